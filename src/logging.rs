//! Logging goes through `tracing`. Task spans double as progress spinners
//! thanks to `tracing-indicatif`.
//!
//! The filter is taken from `FUDE_LOG` when set (any `EnvFilter` directive,
//! e.g. `fude=debug`), otherwise from the level passed on the command line.

use std::sync::LazyLock;

use indicatif::ProgressStyle;
use tracing::level_filters::LevelFilter;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const ENV_FILTER: &str = "FUDE_LOG";

pub(crate) static STYLE_RUN: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("=>-")
});

pub(crate) static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg} [{elapsed}]")
        .expect("Error setting progress bar template")
});

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(level: LevelFilter) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var(ENV_FILTER)
        .from_env_lossy();

    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()?;

    Ok(())
}
