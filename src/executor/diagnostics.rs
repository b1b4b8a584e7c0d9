use std::fmt::Write;

use console::style;

use crate::executor::{BuildRun, Outcome};
use crate::io::as_duration;

impl BuildRun {
    /// Renders a summary of the run: each finished leaf with its timing, then
    /// every failed leaf with the reason it failed.
    pub fn report(&self) -> String {
        let mut f = String::new();

        for task in &self.tasks {
            let mark = match task.outcome {
                Outcome::Success { .. } => style("✔").green(),
                Outcome::Failure { .. } => style("✘").red(),
            };
            let _ = writeln!(
                f,
                "  {mark} {} {}",
                task.name,
                as_duration(task.outcome.duration())
            );
        }

        match &self.outcome {
            Outcome::Success { duration } => {
                let _ = writeln!(
                    f,
                    "Finished '{}' {}",
                    style(&self.root).cyan(),
                    as_duration(*duration)
                );
            }
            Outcome::Failure { failures, duration } => {
                let _ = writeln!(
                    f,
                    "Failed '{}' {}: {} task(s) failed",
                    style(&self.root).cyan(),
                    as_duration(*duration),
                    failures.len()
                );
                for failure in failures {
                    let _ = writeln!(f, "{}", style(&failure.task).red().bold());
                    for line in failure.message.lines() {
                        let _ = writeln!(f, "    {line}");
                    }
                }
            }
        }

        f
    }
}
