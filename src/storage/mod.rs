//! # Storage Module - Snapshot Persistence
//!
//! The bridge keeps three small files under `data_dir`:
//!
//! ```text
//! data/
//! ├── device_mac_token_map.json   ← MAC → access token (registry)
//! ├── scheduled_events.json       ← MAC → label → {start, end, sent}
//! ├── device_counter.txt          ← next display-name number
//! └── .lorabridge.lock            ← held exclusively while a bridge runs
//! ```
//!
//! Every snapshot is rewritten whole: the new content goes to a temp file in the
//! same directory, is fsynced, and is renamed over the target. Readers outside
//! the process therefore only ever observe a complete old or complete new file.

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use log::{debug, warn};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    write_atomic(path, content.as_bytes())
}

/// Atomically replace `path` with `content` (temp file + fsync + rename).
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("snapshot.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut tmp) => {
                tmp.write_all(content)?;
                tmp.flush()?;
                let _ = tmp.sync_all();
                break candidate;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
                continue;
            }
            Err(e) => {
                return Err(anyhow!(
                    "Failed to create temp file for atomic write of {}: {}",
                    path.display(),
                    e
                ))
            }
        }
    };

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(anyhow!("Failed to replace {}: {}", path.display(), e));
    }
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    Ok(())
}

/// Read a whole file, returning `None` when it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        // Guard against leading NULs left by a partial write on some filesystems
        Ok(s) => Ok(Some(s.trim_start_matches('\0').to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow!("Failed to read {}: {}", path.display(), e)),
    }
}

/// Persisted counter for sequential display names (`lora_1`, `lora_2`, ...).
#[derive(Debug, Clone)]
pub struct CounterFile {
    path: PathBuf,
}

impl CounterFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Current value; a missing or unreadable file counts as 1.
    pub fn current(&self) -> u64 {
        match read_optional(&self.path) {
            Ok(Some(text)) => match text.trim().parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(
                        "Counter file {} holds '{}', restarting at 1",
                        self.path.display(),
                        text.trim()
                    );
                    1
                }
            },
            Ok(None) => 1,
            Err(e) => {
                warn!("{}", e);
                1
            }
        }
    }

    pub fn store(&self, value: u64) -> Result<()> {
        write_atomic(&self.path, value.to_string().as_bytes())
    }
}

/// Exclusive advisory lock on the data directory, released on drop.
#[derive(Debug)]
pub struct DataDirLock {
    file: File,
    path: PathBuf,
}

impl DataDirLock {
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let path = data_dir.join(".lorabridge.lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("opening lock file {}", path.display()))?;
        file.try_lock_exclusive().map_err(|e| {
            anyhow!(
                "Data directory {} is in use by another bridge ({})",
                data_dir.display(),
                e
            )
        })?;
        debug!("Acquired data dir lock {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!("Released data dir lock {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces_whole_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("snap.json");
        let mut m = BTreeMap::new();
        m.insert("a", 1);
        write_json_atomic(&path, &m).unwrap();
        m.insert("b", 2);
        write_json_atomic(&path, &m).unwrap();
        let back: BTreeMap<String, i32> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.len(), 2);
        // No temp files left behind
        let leftovers = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().contains(".tmp-"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn counter_defaults_and_persists() {
        let dir = tempdir().unwrap();
        let counter = CounterFile::new(dir.path().join("device_counter.txt"));
        assert_eq!(counter.current(), 1);
        counter.store(7).unwrap();
        assert_eq!(counter.current(), 7);
        fs::write(dir.path().join("device_counter.txt"), "garbage").unwrap();
        assert_eq!(counter.current(), 1);
    }

    #[test]
    fn read_optional_missing_is_none() {
        let dir = tempdir().unwrap();
        assert!(read_optional(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn second_lock_on_same_dir_fails() {
        let dir = tempdir().unwrap();
        let first = DataDirLock::acquire(dir.path()).unwrap();
        assert!(DataDirLock::acquire(dir.path()).is_err());
        drop(first);
        assert!(DataDirLock::acquire(dir.path()).is_ok());
    }
}
