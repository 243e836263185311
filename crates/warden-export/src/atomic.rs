//! Durable-write helper shared by the file-backed sinks.
//!
//! Mirrors the teacher's content-addressable store: write to a sibling
//! `.incomplete` file, `sync_all`, then `fs::rename` into place, tolerating a
//! racing writer that already produced the same final file, then `sync_all`
//! the parent directory so the rename itself is durable.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Atomically write `bytes` as the full contents of `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("incomplete");
    {
        let mut out = fs::File::create(&tmp_path)?;
        out.write_all(bytes)?;
        out.sync_all()?;
    }
    match fs::rename(&tmp_path, path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if path.exists() {
                let _ = fs::remove_file(&tmp_path);
            } else {
                return Err(e);
            }
        }
        Err(e) => return Err(e),
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Ok(dirf) = fs::File::open(parent) {
                let _ = dirf.sync_all();
            }
        }
    }
    Ok(())
}

/// Append `line` (plus a trailing newline) to `path`, rotating the existing
/// file aside to `path.<n>` first if appending would exceed `rotate_max_bytes`
/// (0 disables rollover). Creates the file and parent directories as needed.
pub fn append_with_rollover(path: &Path, line: &str, rotate_max_bytes: u64) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if rotate_max_bytes > 0 {
        if let Ok(meta) = fs::metadata(path) {
            let prospective = meta.len() + line.len() as u64 + 1;
            if prospective > rotate_max_bytes {
                rotate(path)?;
            }
        }
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    Ok(())
}

fn rotate(path: &Path) -> io::Result<()> {
    let mut n = 1u64;
    loop {
        let candidate = path.with_extension(format!("{n}.jsonl"));
        if !candidate.exists() {
            fs::rename(path, &candidate)?;
            return Ok(());
        }
        n += 1;
    }
}
