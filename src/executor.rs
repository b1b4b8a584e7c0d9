mod diagnostics;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::ConfigError;
use crate::registry::{Action, Compose, Plan, Registry};

/// A leaf task that failed, with the reason rendered for humans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub task: Arc<str>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        duration: Duration,
    },
    Failure {
        failures: Vec<Failure>,
        duration: Duration,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn duration(&self) -> Duration {
        match self {
            Outcome::Success { duration } | Outcome::Failure { duration, .. } => *duration,
        }
    }

    pub fn failures(&self) -> &[Failure] {
        match self {
            Outcome::Success { .. } => &[],
            Outcome::Failure { failures, .. } => failures,
        }
    }
}

/// One finished leaf task.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub name: Arc<str>,
    pub start: Instant,
    pub outcome: Outcome,
}

/// One execution of a root task.
#[derive(Debug)]
pub struct BuildRun {
    pub root: Arc<str>,
    pub started: Instant,
    /// Leaf outcomes in completion order.
    pub tasks: Vec<TaskExecution>,
    pub outcome: Outcome,
}

impl BuildRun {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Runs tasks out of a registry.
#[derive(Clone, Copy)]
pub struct Executor<'a> {
    registry: &'a Registry,
}

impl<'a> Executor<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Resolves `name` and runs it to completion. Configuration problems are
    /// returned before any task starts; task failures are part of the run.
    pub fn run(&self, name: &str) -> Result<BuildRun, ConfigError> {
        let plan = self.registry.resolve(name)?;
        Ok(execute(&plan))
    }
}

/// Runs an already resolved plan.
pub fn execute(plan: &Plan) -> BuildRun {
    let root_span = tracing::span!(Level::INFO, "run", task = plan.name());
    root_span.pb_set_length(plan.leaves() as u64);
    root_span.pb_set_style(&crate::logging::STYLE_RUN);
    root_span.pb_set_message(&format!("Running {}", plan.name()));
    let _enter = root_span.enter();

    let state = RunState {
        span: root_span.clone(),
        log: Mutex::new(Vec::new()),
    };

    let started = Instant::now();
    let outcome = state.run(plan);

    match &outcome {
        Outcome::Success { duration } => {
            tracing::info!(task = plan.name(), ?duration, "finished");
        }
        Outcome::Failure { failures, duration } => {
            tracing::error!(
                task = plan.name(),
                ?duration,
                failed = failures.len(),
                "finished with errors"
            );
        }
    }

    BuildRun {
        root: plan.name().into(),
        started,
        tasks: state.log.into_inner().unwrap_or_else(PoisonError::into_inner),
        outcome,
    }
}

struct RunState {
    span: Span,
    log: Mutex<Vec<TaskExecution>>,
}

impl RunState {
    fn run(&self, plan: &Plan) -> Outcome {
        match plan {
            Plan::Leaf { name, action } => self.run_leaf(name, action),
            Plan::Group {
                compose: Compose::Series,
                children,
                ..
            } => {
                let start = Instant::now();
                for child in children {
                    if let Outcome::Failure { failures, .. } = self.run(child) {
                        return Outcome::Failure {
                            failures,
                            duration: start.elapsed(),
                        };
                    }
                }
                Outcome::Success {
                    duration: start.elapsed(),
                }
            }
            Plan::Group {
                compose: Compose::Parallel,
                children,
                ..
            } => {
                let start = Instant::now();
                let outcomes: Vec<Outcome> =
                    children.par_iter().map(|child| self.run(child)).collect();

                let failures: Vec<Failure> = outcomes
                    .into_iter()
                    .flat_map(|outcome| match outcome {
                        Outcome::Success { .. } => Vec::new(),
                        Outcome::Failure { failures, .. } => failures,
                    })
                    .collect();

                let duration = start.elapsed();
                if failures.is_empty() {
                    Outcome::Success { duration }
                } else {
                    Outcome::Failure { failures, duration }
                }
            }
        }
    }

    fn run_leaf(&self, name: &Arc<str>, action: &Action) -> Outcome {
        let span = tracing::span!(parent: &self.span, Level::INFO, "task", name = &**name);
        span.pb_set_style(&crate::logging::STYLE_TASK);
        span.pb_set_message(&format!("Running {name}"));
        let _enter = span.enter();

        let start = Instant::now();

        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| action())) {
            Ok(result) => result.map_err(|e| format!("{e:#}")),
            Err(panic) => Err(if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Task panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Task panicked: {s}")
            } else {
                String::from("Task panicked with unknown payload")
            }),
        };

        let duration = start.elapsed();

        let outcome = match result {
            Ok(()) => {
                tracing::debug!(task = &**name, ?duration, "task succeeded");
                Outcome::Success { duration }
            }
            Err(message) => {
                tracing::error!(task = &**name, ?duration, "{message}");
                Outcome::Failure {
                    failures: vec![Failure {
                        task: name.clone(),
                        message,
                    }],
                    duration,
                }
            }
        };

        self.span.pb_inc(1);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TaskExecution {
                name: name.clone(),
                start,
                outcome: outcome.clone(),
            });

        outcome
    }
}
