//! Asset transform stages.
//!
//! A [`Stage`] takes the files matched by a [`PathSpec`], pushes each one
//! through an ordered chain of [`Step`]s and writes the results below the
//! destination directory. Files are processed in parallel and independently,
//! so one broken file never hides errors in the others.

mod freshness;
mod path;

use std::fmt::{self, Debug};
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

pub use self::freshness::{AlwaysStale, ContentDigest, Disk, Freshness, ModifiedTime, Timestamps};
pub use self::path::{PathSpec, Source};
use crate::error::{StageError, TransformError};
use crate::registry::{Registry, TaskResult};

/// A file moving through a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// The file this asset was read from.
    pub source: Utf8PathBuf,
    /// Output path relative to the stage destination.
    pub path: Utf8PathBuf,
    pub data: Vec<u8>,
}

impl Asset {
    pub fn text(&self) -> anyhow::Result<&str> {
        Ok(std::str::from_utf8(&self.data)?)
    }

    pub fn with_data(self, data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..self
        }
    }

    pub fn with_extension(self, ext: &str) -> Self {
        Self {
            path: self.path.with_extension(ext),
            ..self
        }
    }

    /// Inserts `suffix` before the extension: `main.css` becomes `main.min.css`.
    pub fn with_suffix(self, suffix: &str) -> Self {
        let path = match (self.path.file_stem(), self.path.extension()) {
            (Some(stem), Some(ext)) => self.path.with_file_name(format!("{stem}.{suffix}.{ext}")),
            (Some(stem), None) => self.path.with_file_name(format!("{stem}.{suffix}")),
            _ => self.path,
        };
        Self { path, ..self }
    }
}

/// An opaque file transformation, such as compiling Sass or optimizing an
/// image. Returning `Ok(None)` drops the file from the rest of the chain.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, asset: Asset) -> anyhow::Result<Option<Asset>>;
}

type TransformFn = dyn Fn(Asset) -> anyhow::Result<Option<Asset>> + Send + Sync;

struct FnTransform {
    name: String,
    func: Box<TransformFn>,
}

impl Transform for FnTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Option<Asset>> {
        (self.func)(asset)
    }
}

/// Wraps a closure as a named transform.
pub fn transform<F>(name: impl Into<String>, func: F) -> Arc<dyn Transform>
where
    F: Fn(Asset) -> anyhow::Result<Option<Asset>> + Send + Sync + 'static,
{
    Arc::new(FnTransform {
        name: name.into(),
        func: Box::new(func),
    })
}

#[derive(Clone)]
pub enum Step {
    Apply(Arc<dyn Transform>),
    /// Renames the current asset with a suffix before its extension.
    Rename(String),
    /// Writes the current asset below the destination directory.
    Write,
}

impl Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Apply(t) => write!(f, "Apply({})", t.name()),
            Step::Rename(suffix) => write!(f, "Rename({suffix})"),
            Step::Write => f.write_str("Write"),
        }
    }
}

/// What a successful stage run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// Sources pushed through the chain.
    pub processed: usize,
    /// Sources skipped because their output was fresh.
    pub skipped: usize,
    /// Every file written, sorted.
    pub written: Vec<Utf8PathBuf>,
}

enum Processed {
    Skipped,
    Done(Vec<Utf8PathBuf>),
}

pub struct Stage {
    name: String,
    paths: PathSpec,
    steps: Vec<Step>,
    freshness: Option<Arc<dyn Freshness>>,
}

impl Stage {
    pub fn new(name: impl Into<String>, paths: PathSpec) -> Self {
        Self {
            name: name.into(),
            paths,
            steps: Vec::new(),
            freshness: None,
        }
    }

    pub fn then(mut self, transform: Arc<dyn Transform>) -> Self {
        self.steps.push(Step::Apply(transform));
        self
    }

    pub fn rename(mut self, suffix: impl Into<String>) -> Self {
        self.steps.push(Step::Rename(suffix.into()));
        self
    }

    pub fn write(mut self) -> Self {
        self.steps.push(Step::Write);
        self
    }

    /// Only processes sources whose output isn't fresh according to `policy`.
    pub fn newer(mut self, policy: Arc<dyn Freshness>) -> Self {
        self.freshness = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn paths(&self) -> &PathSpec {
        &self.paths
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn run(&self) -> Result<StageReport, StageError> {
        let s = Instant::now();
        let sources = self.paths.sources()?;

        let results: Vec<_> = sources
            .par_iter()
            .map(|source| self.process(source))
            .collect();

        let mut report = StageReport::default();
        let mut errors = Vec::new();

        for result in results {
            match result {
                Ok(Processed::Skipped) => report.skipped += 1,
                Ok(Processed::Done(written)) => {
                    report.processed += 1;
                    report.written.extend(written);
                }
                Err(error) => errors.push(error),
            }
        }

        if !errors.is_empty() {
            return Err(StageError::Transform(errors));
        }

        report.written.sort();

        tracing::debug!(
            stage = %self.name,
            processed = report.processed,
            skipped = report.skipped,
            written = report.written.len(),
            "stage finished {}",
            crate::io::as_overhead(s)
        );

        Ok(report)
    }

    /// Registers this stage as a leaf task under its own name.
    pub fn register(self, registry: &mut Registry) -> Result<(), crate::error::ConfigError> {
        let name = self.name.clone();
        registry.leaf(name, move || -> TaskResult {
            self.run()?;
            Ok(())
        })
    }

    fn process(&self, source: &Source) -> Result<Processed, TransformError> {
        let target = self.paths.target(source);

        let fresh = self
            .freshness
            .as_ref()
            .is_some_and(|policy| policy.is_fresh(&source.path, &target));

        if fresh {
            tracing::trace!(stage = %self.name, path = %source.path, "fresh, skipping");
            return Ok(Processed::Skipped);
        }

        let fail = |message: String| TransformError {
            stage: self.name.clone(),
            path: source.path.clone(),
            message,
        };

        let data = fs::read(&source.path).map_err(|e| fail(e.to_string()))?;
        let mut asset = Asset {
            source: source.path.clone(),
            path: source.relative.clone(),
            data,
        };
        let mut written = Vec::new();

        for step in &self.steps {
            match step {
                Step::Apply(transform) => match transform.apply(asset) {
                    Ok(Some(next)) => asset = next,
                    Ok(None) => break,
                    Err(e) => return Err(fail(format!("{}: {e:#}", transform.name()))),
                },
                Step::Rename(suffix) => asset = asset.with_suffix(suffix),
                Step::Write => {
                    let path = self.paths.dest().join(&asset.path);
                    write(&path, &asset.data).map_err(|e| fail(e.to_string()))?;
                    written.push(path);
                }
            }
        }

        if let Some(policy) = &self.freshness {
            policy.record(&source.path, &target);
        }

        Ok(Processed::Done(written))
    }
}

fn write(path: &Utf8Path, data: &[u8]) -> std::io::Result<()> {
    crate::io::write_atomic(path, data)
        .map_err(|e| std::io::Error::new(e.kind(), format!("couldn't write {path}: {e}")))
}

impl Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("paths", &self.paths)
            .field("steps", &self.steps)
            .field("freshness", &self.freshness.is_some())
            .finish()
    }
}
