use std::fmt;
use std::net::SocketAddr;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors detected while configuring the pipeline, before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task '{name}' is not registered{}", referrer(.referenced_by))]
    UnknownTask {
        name: String,
        referenced_by: Option<String>,
    },

    #[error("Cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Couldn't read config file '{0}'.\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, toml::de::Error),

    #[error("Invalid glob pattern '{0}'.\n{1}")]
    Pattern(String, globset::Error),
}

fn referrer(by: &Option<String>) -> String {
    match by {
        Some(by) => format!(" (referenced by '{by}')"),
        None => String::new(),
    }
}

impl ConfigError {
    pub(crate) fn unknown(name: impl Into<String>) -> Self {
        ConfigError::UnknownTask {
            name: name.into(),
            referenced_by: None,
        }
    }
}

/// A single asset that failed to compile or optimize.
#[derive(Debug, Clone, Error)]
#[error("[{stage}] {path}: {message}")]
pub struct TransformError {
    pub stage: String,
    pub path: Utf8PathBuf,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Couldn't list source files.\n{0}")]
    Walk(#[from] walkdir::Error),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("{}", Failures(.0))]
    Transform(Vec<TransformError>),
}

struct Failures<'a>(&'a [TransformError]);

impl fmt::Display for Failures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} asset(s) failed", self.0.len())?;
        for error in self.0 {
            write!(f, "\n  {error}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Couldn't bind {0}.\n{1}")]
    Bind(SocketAddr, std::io::Error),

    #[error("Preview server failed.\n{0}")]
    Runtime(#[from] std::io::Error),
}

/// Top level error of the `fude` binary.
#[derive(Debug, Error)]
pub enum FudeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Error while serving the preview:\n{0}")]
    Serve(#[from] ServeError),

    #[error("Couldn't initialize logging.\n{0}")]
    Logging(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_task_names_the_referrer() {
        let err = ConfigError::UnknownTask {
            name: "build:css".into(),
            referenced_by: Some("build".into()),
        };
        assert_eq!(
            err.to_string(),
            "Task 'build:css' is not registered (referenced by 'build')"
        );
        assert_eq!(
            ConfigError::unknown("x").to_string(),
            "Task 'x' is not registered"
        );
    }

    #[test]
    fn cycle_lists_the_path() {
        let err = ConfigError::CyclicDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Cyclic dependency: a -> b -> a");
    }

    #[test]
    fn stage_failures_list_every_asset() {
        let err = StageError::Transform(vec![
            TransformError {
                stage: "build:style".into(),
                path: "src/sass/a.scss".into(),
                message: "expected \";\"".into(),
            },
            TransformError {
                stage: "build:style".into(),
                path: "src/sass/b.scss".into(),
                message: "undefined variable".into(),
            },
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 asset(s) failed"));
        assert!(text.contains("[build:style] src/sass/a.scss: expected \";\""));
        assert!(text.contains("[build:style] src/sass/b.scss: undefined variable"));
    }
}
