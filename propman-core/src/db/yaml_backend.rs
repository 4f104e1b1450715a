//! YAML file storage backend
//!
//! This backend stores all records in a single YAML file through `Storage`.
//! Every per-table operation uses the trait defaults, which run inside
//! `apply()` and therefore under the file's exclusive lock.

use std::path::{Path, PathBuf};

use crate::error::StoreResult;
use crate::models::LedgerSnapshot;
use crate::storage::Storage;
use super::traits::{BackendType, DatabaseBackend, Mutation};

/// YAML file backend implementation
pub struct YamlBackend {
    storage: Storage,
    path: PathBuf,
}

impl YamlBackend {
    /// Creates a new YAML backend for the given file path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            storage: Storage::new(&path),
            path,
        }
    }

    /// Gets a reference to the underlying Storage
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl DatabaseBackend for YamlBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Yaml
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<LedgerSnapshot> {
        self.storage.load()
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> StoreResult<()> {
        self.storage.save(snapshot)
    }

    fn apply(&self, mutation: &mut Mutation<'_>) -> StoreResult<usize> {
        self.storage.update_atomically(|snapshot| mutation(snapshot))
    }
}
