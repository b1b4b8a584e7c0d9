use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{ConfigError, StageError};
use crate::globs::Globs;

/// Where a stage reads its sources from and where it writes them to.
#[derive(Debug, Clone)]
pub struct PathSpec {
    base: Utf8PathBuf,
    globs: Globs,
    ignore: Option<Globs>,
    dest: Utf8PathBuf,
}

/// A matched source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Location on disk.
    pub path: Utf8PathBuf,
    /// Output path relative to the destination directory.
    pub relative: Utf8PathBuf,
}

impl PathSpec {
    pub fn new<I, S>(
        base: impl Into<Utf8PathBuf>,
        patterns: I,
        dest: impl Into<Utf8PathBuf>,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            base: base.into(),
            globs: Globs::new(patterns)?,
            ignore: None,
            dest: dest.into(),
        })
    }

    /// Excludes sources matching any of `patterns`, relative to the base.
    pub fn ignore<I, S>(mut self, patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let globs = Globs::new(patterns)?;
        self.ignore = (!globs.is_empty()).then_some(globs);
        Ok(self)
    }

    pub fn base(&self) -> &Utf8Path {
        &self.base
    }

    pub fn dest(&self) -> &Utf8Path {
        &self.dest
    }

    pub fn globs(&self) -> &Globs {
        &self.globs
    }

    /// Lists the source files in a stable order.
    pub fn sources(&self) -> Result<Vec<Source>, StageError> {
        let found = self.globs.files_with_parents(&self.base)?;

        Ok(found
            .into_iter()
            .filter(|(path, _)| !self.is_ignored(path))
            .map(|(path, relative)| Source { path, relative })
            .collect())
    }

    /// Output location of a source before any transform renamed it.
    pub fn target(&self, source: &Source) -> Utf8PathBuf {
        self.dest.join(&source.relative)
    }

    fn is_ignored(&self, path: &Utf8Path) -> bool {
        let Some(ignore) = &self.ignore else {
            return false;
        };
        match path.strip_prefix(&self.base) {
            Ok(relative) => ignore.matches(relative),
            Err(_) => false,
        }
    }
}
