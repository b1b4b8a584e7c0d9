//! Glob sets used by both the stages (to enumerate sources) and the watcher
//! (to match change events).
//!
//! Patterns are relative to some base directory and support brace
//! alternation (`*.{png,jpg}`). A `*` never crosses a `/`; use `**` for that.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{ConfigError, StageError};

#[derive(Debug, Clone)]
struct Entry {
    /// Leading components without wildcards, e.g. `sass` for `sass/*.scss`.
    parent: Utf8PathBuf,
    matcher: GlobMatcher,
}

/// A compiled set of relative glob patterns.
#[derive(Debug, Clone)]
pub struct Globs {
    sources: Vec<String>,
    entries: Vec<Entry>,
    set: GlobSet,
}

impl Globs {
    pub fn new<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sources = Vec::new();
        let mut entries = Vec::new();
        let mut builder = GlobSetBuilder::new();

        for source in patterns {
            let source = source.as_ref();
            let glob = GlobBuilder::new(source)
                .literal_separator(true)
                .build()
                .map_err(|e| ConfigError::Pattern(source.to_string(), e))?;

            entries.push(Entry {
                parent: static_parent(source),
                matcher: glob.compile_matcher(),
            });
            builder.add(glob);
            sources.push(source.to_string());
        }

        let set = builder
            .build()
            .map_err(|e| ConfigError::Pattern(sources.join(", "), e))?;

        Ok(Self {
            sources,
            entries,
            set,
        })
    }

    /// The patterns as written.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks a path relative to the base directory.
    pub fn matches(&self, path: &Utf8Path) -> bool {
        self.set.is_match(path.as_std_path())
    }

    /// Lists files under `base` matched by any pattern, sorted and deduplicated.
    pub fn files(&self, base: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StageError> {
        Ok(self.files_with_parents(base)?.into_keys().collect())
    }

    /// Lists matched files together with the path of each file relative to
    /// the static parent of the pattern that found it first.
    pub(crate) fn files_with_parents(
        &self,
        base: &Utf8Path,
    ) -> Result<BTreeMap<Utf8PathBuf, Utf8PathBuf>, StageError> {
        let mut found = BTreeMap::new();

        for entry in &self.entries {
            let root = base.join(&entry.parent);
            if !root.is_dir() {
                continue;
            }

            for item in WalkDir::new(&root).follow_links(true) {
                let item = item?;
                if !item.file_type().is_file() {
                    continue;
                }

                let path = Utf8PathBuf::try_from(item.into_path())?;
                if found.contains_key(&path) {
                    continue;
                }
                let Ok(from_base) = path.strip_prefix(base) else {
                    continue;
                };
                if !entry.matcher.is_match(from_base.as_std_path()) {
                    continue;
                }

                let relative = match path.strip_prefix(&root) {
                    Ok(relative) => relative.to_path_buf(),
                    Err(_) => Utf8PathBuf::from(path.file_name().unwrap_or_default()),
                };
                found.insert(path, relative);
            }
        }

        Ok(found)
    }
}

/// Splits a glob into the leading components that contain no wildcards.
pub(crate) fn static_parent(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();
    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[', '{']))
        .unwrap_or(components.len().saturating_sub(1));

    components.iter().take(split).collect()
}
