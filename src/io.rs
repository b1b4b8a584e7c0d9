use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;

use crate::globs::Globs;

const ANSI_BLUE: Style = Style::new().blue();

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn as_overhead(s: Instant) -> impl Display {
    as_duration(s.elapsed())
}

pub fn as_duration(d: Duration) -> impl Display {
    let f = format!("(+{}ms)", d.as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Writes `data` to `path` by writing a temporary sibling first and renaming
/// it over the target. Readers never observe a truncated file.
pub fn write_atomic(path: &Utf8Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let name = path.file_name().unwrap_or("out");
    let temp = dir.join(format!(
        ".{name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = fs::File::create(&temp)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&temp, path));

    if result.is_err() {
        fs::remove_file(&temp).ok();
    }

    result
}

/// Removes a file or a directory tree, ignoring targets that don't exist.
pub fn remove(path: &Utf8Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Removes every file under `dir` matched by `globs`, returning the removed paths.
pub fn remove_matching(dir: &Utf8Path, globs: &Globs) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let mut removed = Vec::new();
    for path in globs.files(dir)? {
        remove(&path)?;
        removed.push(path);
    }
    Ok(removed)
}
