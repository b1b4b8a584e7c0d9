//! Watch mode.
//!
//! A single recursive `notify` watcher covers the base directory. A
//! dispatcher thread turns every create, modify and remove event into a path
//! relative to the base and forwards it to each binding whose globs match.
//! Every binding owns a debounce thread, so a slow rebuild of styles never
//! holds back a rebuild of scripts.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};

use crate::error::WatchError;
use crate::globs::Globs;
use crate::registry::TaskResult;

type Trigger = Box<dyn Fn() -> TaskResult + Send>;

struct Binding {
    globs: Globs,
    debounce: Duration,
    trigger: Trigger,
}

pub struct Watcher {
    base: Utf8PathBuf,
    bindings: Vec<Binding>,
}

impl Watcher {
    pub fn new(base: impl Into<Utf8PathBuf>) -> Self {
        Self {
            base: base.into(),
            bindings: Vec::new(),
        }
    }

    /// Calls `on_trigger` once after a burst of changes to files matching
    /// `patterns` settles for `debounce`.
    pub fn bind<I, S, F>(
        &mut self,
        patterns: I,
        debounce: Duration,
        on_trigger: F,
    ) -> Result<&mut Self, WatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn() -> TaskResult + Send + 'static,
    {
        let globs = Globs::new(patterns)?;

        self.bindings.push(Binding {
            globs,
            debounce,
            trigger: Box::new(on_trigger),
        });

        Ok(self)
    }

    pub fn start(self) -> Result<WatchSession, WatchError> {
        let base = self.base.canonicalize_utf8()?;

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)?;
        watcher.watch(base.as_std_path(), RecursiveMode::Recursive)?;
        tracing::info!(%base, "watching for changes");

        let mut routes = Vec::new();
        let mut workers = Vec::new();

        for binding in self.bindings {
            let (btx, brx) = mpsc::channel();
            let label = binding.globs.sources().join(", ");
            routes.push((binding.globs, btx));

            let debounce = binding.debounce;
            let trigger = binding.trigger;
            workers.push(std::thread::spawn(move || {
                debounce_loop(&brx, debounce, || {
                    tracing::debug!(patterns = %label, "change detected");
                    if let Err(e) = trigger() {
                        tracing::error!(patterns = %label, "{e:#}");
                    }
                });
            }));
        }

        let dispatcher = std::thread::spawn(move || dispatch(&base, &rx, &routes));

        Ok(WatchSession {
            watcher,
            dispatcher,
            workers,
        })
    }
}

/// A running watcher. Dropping it stops delivering events.
pub struct WatchSession {
    watcher: RecommendedWatcher,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl WatchSession {
    /// Blocks for as long as the watcher runs.
    pub fn wait(self) {
        let WatchSession {
            watcher,
            dispatcher,
            workers,
        } = self;

        dispatcher.join().ok();
        drop(watcher);
        for worker in workers {
            worker.join().ok();
        }
    }
}

fn dispatch(
    base: &Utf8Path,
    rx: &Receiver<notify::Result<Event>>,
    routes: &[(Globs, Sender<()>)],
) {
    for result in rx {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("watch error: {e}");
                continue;
            }
        };

        if !matches!(
            event.kind,
            EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
        ) {
            continue;
        }

        for path in &event.paths {
            let Some(path) = Utf8Path::from_path(path) else {
                continue;
            };
            let Ok(relative) = path.strip_prefix(base) else {
                continue;
            };

            for (globs, tx) in routes {
                if globs.matches(relative) {
                    tracing::trace!(%relative, "matched");
                    tx.send(()).ok();
                }
            }
        }
    }
}

/// Waits for a first signal, then for a quiet period of `window`, and fires
/// once. Signals arriving while `fire` runs are coalesced into the next call.
pub(crate) fn debounce_loop<F: FnMut()>(rx: &Receiver<()>, window: Duration, mut fire: F) {
    while rx.recv().is_ok() {
        loop {
            match rx.recv_timeout(window) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    fire();
                    return;
                }
            }
        }
        fire();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn burst_fires_once() {
        let (tx, rx) = mpsc::channel();
        let sender = thread::spawn(move || {
            for _ in 0..10 {
                tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(5));
            }
        });

        let mut fired = 0;
        debounce_loop(&rx, Duration::from_millis(100), || fired += 1);
        sender.join().unwrap();

        assert_eq!(fired, 1);
    }

    #[test]
    fn separate_bursts_fire_separately() {
        let (tx, rx) = mpsc::channel();
        let sender = thread::spawn(move || {
            tx.send(()).unwrap();
            tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(300));
            tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let mut fired = 0;
        debounce_loop(&rx, Duration::from_millis(50), || fired += 1);
        sender.join().unwrap();

        assert_eq!(fired, 2);
    }

    #[test]
    fn signals_during_a_trigger_coalesce() {
        let (tx, rx) = mpsc::channel();
        let mut feeder = Some(tx.clone());
        let mut calls = 0;

        tx.send(()).unwrap();
        drop(tx);

        debounce_loop(&rx, Duration::from_millis(20), || {
            calls += 1;
            if let Some(feeder) = feeder.take() {
                for _ in 0..5 {
                    feeder.send(()).unwrap();
                }
            }
        });

        assert_eq!(calls, 2);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut watcher = Watcher::new(".");
        let err = watcher
            .bind(["[oops"], Duration::from_millis(10), || Ok(()))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            WatchError::Pattern(crate::error::ConfigError::Pattern(p, _)) if p == "[oops"
        ));
    }

    #[test]
    fn file_changes_trigger_matching_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("sass")).unwrap();

        let styles = Arc::new(AtomicUsize::new(0));
        let scripts = Arc::new(AtomicUsize::new(0));

        let mut watcher = Watcher::new(&root);
        let hits = styles.clone();
        watcher
            .bind(["sass/**/*.scss"], Duration::from_millis(150), move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        let hits = scripts.clone();
        watcher
            .bind(["js/*.js"], Duration::from_millis(150), move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let _session = watcher.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        for i in 0..3 {
            fs::write(root.join("sass/main.scss"), format!("a {{ b: {i} }}")).unwrap();
        }
        fs::write(root.join("notes.txt"), "ignored").unwrap();

        thread::sleep(Duration::from_millis(1000));

        assert_eq!(styles.load(Ordering::SeqCst), 1);
        assert_eq!(scripts.load(Ordering::SeqCst), 0);
    }

    fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn slow_trigger_does_not_hold_back_other_bindings() {
        let (_dir, root) = temp_root();
        fs::create_dir_all(root.join("slow")).unwrap();
        fs::create_dir_all(root.join("fast")).unwrap();

        let slow_started = Arc::new(AtomicUsize::new(0));
        let slow_finished = Arc::new(AtomicUsize::new(0));
        let fast = Arc::new(AtomicUsize::new(0));

        let mut watcher = Watcher::new(&root);
        let (started, finished) = (slow_started.clone(), slow_finished.clone());
        watcher
            .bind(["slow/*.txt"], Duration::from_millis(50), move || {
                started.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1500));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        let hits = fast.clone();
        watcher
            .bind(["fast/*.txt"], Duration::from_millis(50), move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let _session = watcher.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        fs::write(root.join("slow/a.txt"), "a").unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(slow_started.load(Ordering::SeqCst), 1);

        fs::write(root.join("fast/b.txt"), "b").unwrap();
        thread::sleep(Duration::from_millis(400));

        assert_eq!(fast.load(Ordering::SeqCst), 1);
        assert_eq!(slow_finished.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_trigger_keeps_watching() {
        let (_dir, root) = temp_root();
        fs::create_dir_all(root.join("sass")).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));

        let mut watcher = Watcher::new(&root);
        let hits = calls.clone();
        watcher
            .bind(["sass/*.scss"], Duration::from_millis(100), move || {
                if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("syntax error");
                }
                Ok(())
            })
            .unwrap();

        let _session = watcher.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        fs::write(root.join("sass/main.scss"), "a {").unwrap();
        thread::sleep(Duration::from_millis(600));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        fs::write(root.join("sass/main.scss"), "a {}").unwrap();
        thread::sleep(Duration::from_millis(600));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
