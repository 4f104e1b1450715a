//! Migration utilities for converting between storage backends
//!
//! This module provides functions to migrate data between YAML and SQLite backends,
//! as well as import/export to JSON format for interoperability.

use anyhow::{Context, Result};
use std::path::Path;

use crate::models::LedgerSnapshot;
use super::traits::DatabaseBackend;
use super::{SqliteBackend, YamlBackend};

/// Migrates data from a YAML file to a SQLite database
///
/// # Returns
/// The number of records migrated
pub fn migrate_yaml_to_sqlite<P1: AsRef<Path>, P2: AsRef<Path>>(
    yaml_path: P1,
    sqlite_path: P2,
) -> Result<usize> {
    let yaml_backend = YamlBackend::new(yaml_path);
    let sqlite_backend = SqliteBackend::new(sqlite_path)?;
    copy_between(&yaml_backend, &sqlite_backend)
}

/// Migrates data from a SQLite database to a YAML file
///
/// # Returns
/// The number of records migrated
pub fn migrate_sqlite_to_yaml<P1: AsRef<Path>, P2: AsRef<Path>>(
    sqlite_path: P1,
    yaml_path: P2,
) -> Result<usize> {
    let sqlite_backend = SqliteBackend::new(sqlite_path)?;
    let yaml_backend = YamlBackend::new(yaml_path);
    copy_between(&sqlite_backend, &yaml_backend)
}

fn copy_between(source: &dyn DatabaseBackend, destination: &dyn DatabaseBackend) -> Result<usize> {
    let snapshot = source
        .load()
        .with_context(|| format!("Failed to load {} database", source.backend_type()))?;

    destination
        .save(&snapshot)
        .with_context(|| format!("Failed to save to {} database", destination.backend_type()))?;

    Ok(record_count(&snapshot))
}

fn record_count(snapshot: &LedgerSnapshot) -> usize {
    snapshot.requests.len()
        + snapshot.relationships.len()
        + snapshot.notifications.len()
        + snapshot.incidents.len()
}

/// Exports a LedgerSnapshot to a JSON file
pub fn export_to_json<P: AsRef<Path>>(snapshot: &LedgerSnapshot, json_path: P) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)
        .context("Failed to serialize to JSON")?;

    std::fs::write(json_path, json)
        .context("Failed to write JSON file")?;

    Ok(())
}

/// Imports a LedgerSnapshot from a JSON file
pub fn import_from_json<P: AsRef<Path>>(json_path: P) -> Result<LedgerSnapshot> {
    let json = std::fs::read_to_string(json_path)
        .context("Failed to read JSON file")?;

    let snapshot: LedgerSnapshot = serde_json::from_str(&json)
        .context("Failed to parse JSON")?;

    Ok(snapshot)
}

/// Exports data from any backend to a JSON file
pub fn export_backend_to_json<P: AsRef<Path>>(
    backend: &dyn DatabaseBackend,
    json_path: P,
) -> Result<usize> {
    let snapshot = backend.load()?;
    export_to_json(&snapshot, json_path)?;
    Ok(record_count(&snapshot))
}

/// Imports data from a JSON file into any backend, replacing its content
pub fn import_json_to_backend<P: AsRef<Path>>(
    json_path: P,
    backend: &dyn DatabaseBackend,
) -> Result<usize> {
    let snapshot = import_from_json(json_path)?;
    backend.save(&snapshot)?;
    Ok(record_count(&snapshot))
}
