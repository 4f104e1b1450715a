//! Database abstraction layer for the relationship store
//!
//! This module provides a trait-based abstraction for storage backends,
//! allowing the engine to use different databases (YAML files, SQLite)
//! while maintaining a consistent interface.

mod filters;
mod migration;
mod sqlite_backend;
mod traits;
mod yaml_backend;

pub use filters::{IncidentFilter, NotificationFilter, RelationshipFilter, RequestFilter};
pub use migration::{
    export_backend_to_json, export_to_json, import_from_json, import_json_to_backend,
    migrate_sqlite_to_yaml, migrate_yaml_to_sqlite,
};
pub use sqlite_backend::SqliteBackend;
pub use traits::{BackendType, DatabaseBackend, DatabaseConfig, DatabaseStats, Mutation};
pub use yaml_backend::YamlBackend;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Infers the backend type from a file extension
pub fn infer_backend_type(path: &Path) -> BackendType {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => BackendType::Yaml,
        Some("db") | Some("sqlite") | Some("sqlite3") => BackendType::Sqlite,
        _ => BackendType::Sqlite, // Default to SQLite
    }
}

/// Creates a database backend based on the file extension or explicit type
pub fn create_backend(path: &Path, backend_type: Option<BackendType>) -> Result<Arc<dyn DatabaseBackend>> {
    let bt = backend_type.unwrap_or_else(|| infer_backend_type(path));

    match bt {
        BackendType::Yaml => Ok(Arc::new(YamlBackend::new(path))),
        BackendType::Sqlite => Ok(Arc::new(SqliteBackend::new(path)?)),
    }
}

/// Creates a database backend from configuration
pub fn create_backend_from_config(config: &DatabaseConfig) -> Result<Arc<dyn DatabaseBackend>> {
    let bt = config.backend_type.unwrap_or_else(|| infer_backend_type(&config.path));

    match bt {
        BackendType::Yaml => Ok(Arc::new(YamlBackend::new(&config.path))),
        BackendType::Sqlite => Ok(Arc::new(SqliteBackend::with_config(config)?)),
    }
}

/// Opens an existing database or creates a new one
pub fn open_or_create(path: &Path, backend_type: Option<BackendType>) -> Result<Arc<dyn DatabaseBackend>> {
    let backend = create_backend(path, backend_type)?;
    backend.create_if_not_exists()?;
    Ok(backend)
}
