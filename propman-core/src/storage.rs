use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::StoreResult;
use crate::models::LedgerSnapshot;

/// How long to wait for another process to release the lock file
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles saving and loading a ledger snapshot from a YAML file, with file
/// locking so several processes can share one file
pub struct Storage {
    file_path: PathBuf,
    lock_file_path: PathBuf,
}

impl Storage {
    /// Creates a new Storage instance
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        let lock_file_path = file_path.with_extension("yaml.lock");
        Self {
            file_path,
            lock_file_path,
        }
    }

    /// Returns the path to the storage file
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn open_lock_file(&self) -> Result<File> {
        if let Some(parent) = self.lock_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_file_path)
            .with_context(|| format!("Failed to open lock file: {:?}", self.lock_file_path))
    }

    /// Polls `try_lock` until it succeeds or the timeout expires
    fn wait_for_lock<F>(&self, lock_file: &File, try_lock: F) -> Result<()>
    where
        F: Fn(&File) -> std::io::Result<()>,
    {
        let start = Instant::now();
        loop {
            match try_lock(lock_file) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() > LOCK_TIMEOUT {
                        anyhow::bail!(
                            "Timeout waiting for file lock - another process may be writing: {:?}",
                            self.file_path
                        );
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to acquire lock on {:?}", self.lock_file_path)
                    })
                }
            }
        }
    }

    /// Acquire an exclusive lock for writing.
    /// The returned handle must be held for the duration of the operation.
    fn acquire_write_lock(&self) -> Result<File> {
        let mut lock_file = self.open_lock_file()?;
        self.wait_for_lock(&lock_file, |f| FileExt::try_lock_exclusive(f))?;

        // Lock holder info, for debugging stale locks
        let _ = lock_file.set_len(0);
        let _ = writeln!(
            lock_file,
            "Locked by PID {} at {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        Ok(lock_file)
    }

    /// Acquire a shared lock for reading
    fn acquire_read_lock(&self) -> Result<File> {
        let lock_file = self.open_lock_file()?;
        self.wait_for_lock(&lock_file, |f| FileExt::try_lock_shared(f))?;
        Ok(lock_file)
    }

    /// Reads the file; a missing file is an empty snapshot
    fn read_snapshot(&self) -> Result<LedgerSnapshot> {
        if !self.file_path.exists() {
            return Ok(LedgerSnapshot::new());
        }

        let file = File::open(&self.file_path)
            .with_context(|| format!("Failed to open file: {:?}", self.file_path))?;
        let reader = BufReader::new(file);

        serde_yaml::from_reader(reader)
            .with_context(|| format!("Failed to parse YAML from {:?}", self.file_path))
    }

    fn write_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(snapshot)?;
        fs::write(&self.file_path, yaml)
            .with_context(|| format!("Failed to write {:?}", self.file_path))?;
        Ok(())
    }

    /// Loads the snapshot under a shared lock
    pub fn load(&self) -> StoreResult<LedgerSnapshot> {
        let _lock = self.acquire_read_lock()?;
        Ok(self.read_snapshot()?)
    }

    /// Saves the snapshot under an exclusive lock
    pub fn save(&self, snapshot: &LedgerSnapshot) -> StoreResult<()> {
        let _lock = self.acquire_write_lock()?;
        Ok(self.write_snapshot(snapshot)?)
    }

    /// Perform an atomic update operation with proper locking.
    /// This reloads the file, applies changes, and saves only if the update
    /// succeeded and changed something.
    pub fn update_atomically<F>(&self, update_fn: F) -> StoreResult<usize>
    where
        F: FnOnce(&mut LedgerSnapshot) -> StoreResult<usize>,
    {
        // Lock is released when the handle is dropped
        let _lock = self.acquire_write_lock()?;

        let mut snapshot = self.read_snapshot()?;
        let changed = update_fn(&mut snapshot)?;
        if changed > 0 {
            self.write_snapshot(&snapshot)?;
        }
        Ok(changed)
    }
}
