#![forbid(unsafe_code)]
//! `fude` is an asset pipeline for static sites. It compiles styles,
//! transpiles scripts, optimizes images, copies fonts and minifies markup,
//! and it serves the result with live reload while you edit.
//!
//! Work is expressed as named tasks in a [`Registry`]: leaves run an action,
//! groups run other tasks in series or in parallel. The [`Executor`] runs a
//! task and reports a [`BuildRun`]. Most leaves are [`Stage`]s, which push a
//! set of files through a chain of [`Transform`]s and write the results.

pub mod config;
mod error;
pub mod executor;
mod globs;
mod hash;
mod io;
pub mod logging;
pub mod plugin;
pub mod registry;
pub mod server;
pub mod site;
pub mod stage;
pub mod watch;

pub use crate::config::Config;
pub use crate::error::*;
pub use crate::executor::{BuildRun, Executor, Failure, Outcome, TaskExecution};
pub use crate::globs::Globs;
pub use crate::registry::{Action, Compose, Definition, Plan, Registry, TaskResult};
pub use crate::server::{PreviewServer, ReloadKind, ServerOptions};
pub use crate::site::{Binding, Profile, Site, Toolchain};
pub use crate::stage::{Asset, PathSpec, Stage, StageReport, Step, Transform};
pub use crate::watch::{WatchSession, Watcher};
