//! SQLite database storage backend
//!
//! This backend stores records in a SQLite database file. Uniqueness of pending
//! requests and active relationships is enforced by partial unique indexes, and
//! every conditional write is a single `UPDATE ... WHERE` statement.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior,
};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{
    EntityKind, Incident, IncidentStatus, LedgerSnapshot, ManagedRelationship, Notification,
    NotificationAction, NotificationCategory, RelatedEntity, RelationshipStatus, Request,
    RequestStatus, RequestTransition,
};

use super::filters::{IncidentFilter, NotificationFilter, RelationshipFilter, RequestFilter};
use super::traits::{BackendType, DatabaseBackend, DatabaseConfig, Mutation};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// How long a statement waits on a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ids bound per statement; SQLite caps a statement at 32766 parameters
const MAX_BOUND_IDS: usize = 500;

const REQUEST_COLUMNS: &str = "id, requester_id, target_id, community_id, status, request_message,
     response_message, requested_at, responded_at, responder_id";

const RELATIONSHIP_COLUMNS: &str = "id, administrator_id, member_id, community_id, status,
     established_at, established_by, notes, ended_at";

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, title, message, category, related_type,
     related_id, is_read, action_url, action_label, created_at";

const INCIDENT_COLUMNS: &str =
    "id, reporter_id, assigned_administrator_id, title, status, created_at, updated_at";

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, detail) = &err {
            if code.code == ErrorCode::ConstraintViolation {
                return StoreError::Conflict(detail.clone().unwrap_or_else(|| code.to_string()));
            }
        }
        StoreError::Unavailable(err.into())
    }
}

/// A stored enum value this version does not recognise
#[derive(Error, Debug)]
#[error("Unrecognized stored value '{0}'")]
struct UnknownValue(String);

/// SQLite backend implementation
pub struct SqliteBackend {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Creates a new SQLite backend with WAL enabled
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path.as_ref(), true)
    }

    /// Creates a backend from configuration
    pub fn with_config(config: &DatabaseConfig) -> Result<Self> {
        Self::open(&config.path, config.wal_mode)
    }

    /// Creates a private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(PathBuf::from(":memory:"), conn, false)
    }

    fn open(path: &Path, wal_mode: bool) -> Result<Self> {
        let path = path.to_path_buf();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open SQLite database: {:?}", path))?;

        Self::from_connection(path, conn, wal_mode)
    }

    fn from_connection(path: PathBuf, conn: Connection, wal_mode: bool) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if wal_mode {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let backend = Self {
            path,
            conn: Mutex::new(conn),
        };

        backend.init_schema()?;
        Ok(backend)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let mut conn = self.conn()?;

        // Concurrent openers of a fresh file serialize on the write lock;
        // schema.sql is idempotent, so the later one changes nothing
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let has_version_table: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
            [],
            |row| row.get(0),
        )?;
        let current_version: i32 = if has_version_table {
            tx.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))?
        } else {
            0
        };

        if current_version == 0 {
            tx.execute_batch(include_str!("schema.sql"))?;
            tx.commit()?;
        } else if current_version < SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema version {} is outdated, expected {}",
                current_version,
                SCHEMA_VERSION
            );
        }

        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable(anyhow!("SQLite connection lock poisoned")))
    }

    /// Fixed-width RFC 3339 so text ordering matches time ordering
    fn ts(time: &DateTime<Utc>) -> String {
        time.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
    }

    fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
        let raw: String = row.get(idx)?;
        Uuid::parse_str(&raw).map_err(|e| Self::conversion_error(idx, e))
    }

    fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
        let raw: String = row.get(idx)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Self::conversion_error(idx, e))
    }

    fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = row.get(idx)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Self::conversion_error(idx, e))
        })
        .transpose()
    }

    fn enum_at<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
        let raw: String = row.get(idx)?;
        parse(&raw).ok_or_else(|| Self::conversion_error(idx, UnknownValue(raw)))
    }

    fn request_from_row(row: &Row<'_>) -> rusqlite::Result<Request> {
        Ok(Request {
            id: Self::uuid_at(row, 0)?,
            requester_id: row.get(1)?,
            target_id: row.get(2)?,
            community_id: row.get(3)?,
            status: Self::enum_at(row, 4, RequestStatus::parse)?,
            request_message: row.get(5)?,
            response_message: row.get(6)?,
            requested_at: Self::time_at(row, 7)?,
            responded_at: Self::opt_time_at(row, 8)?,
            responder_id: row.get(9)?,
        })
    }

    fn relationship_from_row(row: &Row<'_>) -> rusqlite::Result<ManagedRelationship> {
        Ok(ManagedRelationship {
            id: Self::uuid_at(row, 0)?,
            administrator_id: row.get(1)?,
            member_id: row.get(2)?,
            community_id: row.get(3)?,
            status: Self::enum_at(row, 4, RelationshipStatus::parse)?,
            established_at: Self::time_at(row, 5)?,
            established_by: row.get(6)?,
            notes: row.get(7)?,
            ended_at: Self::opt_time_at(row, 8)?,
        })
    }

    fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
        let related_type: Option<String> = row.get(5)?;
        let related_id: Option<String> = row.get(6)?;
        let related = match (related_type, related_id) {
            (Some(kind), Some(id)) => Some(RelatedEntity {
                kind: EntityKind::parse(&kind)
                    .ok_or_else(|| Self::conversion_error(5, UnknownValue(kind.clone())))?,
                id: Uuid::parse_str(&id).map_err(|e| Self::conversion_error(6, e))?,
            }),
            _ => None,
        };

        let action_url: Option<String> = row.get(8)?;
        let action_label: Option<String> = row.get(9)?;
        let action = match (action_url, action_label) {
            (Some(url), Some(label)) => Some(NotificationAction { url, label }),
            _ => None,
        };

        Ok(Notification {
            id: Self::uuid_at(row, 0)?,
            recipient_id: row.get(1)?,
            title: row.get(2)?,
            message: row.get(3)?,
            category: Self::enum_at(row, 4, NotificationCategory::parse)?,
            related,
            read: row.get(7)?,
            action,
            created_at: Self::time_at(row, 10)?,
        })
    }

    fn incident_from_row(row: &Row<'_>) -> rusqlite::Result<Incident> {
        Ok(Incident {
            id: Self::uuid_at(row, 0)?,
            reporter_id: row.get(1)?,
            assigned_administrator_id: row.get(2)?,
            title: row.get(3)?,
            status: Self::enum_at(row, 4, IncidentStatus::parse)?,
            created_at: Self::time_at(row, 5)?,
            updated_at: Self::time_at(row, 6)?,
        })
    }

    fn write_request(conn: &Connection, req: &Request) -> StoreResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO requests ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                REQUEST_COLUMNS
            ),
            params![
                req.id.to_string(),
                req.requester_id,
                req.target_id,
                req.community_id,
                req.status.as_str(),
                req.request_message,
                req.response_message,
                Self::ts(&req.requested_at),
                req.responded_at.as_ref().map(Self::ts),
                req.responder_id,
            ],
        )?;
        Ok(())
    }

    fn write_relationship(conn: &Connection, rel: &ManagedRelationship) -> StoreResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO relationships ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                RELATIONSHIP_COLUMNS
            ),
            params![
                rel.id.to_string(),
                rel.administrator_id,
                rel.member_id,
                rel.community_id,
                rel.status.as_str(),
                Self::ts(&rel.established_at),
                rel.established_by,
                rel.notes,
                rel.ended_at.as_ref().map(Self::ts),
            ],
        )?;
        Ok(())
    }

    fn write_notification(conn: &Connection, n: &Notification) -> StoreResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO notifications ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                NOTIFICATION_COLUMNS
            ),
            params![
                n.id.to_string(),
                n.recipient_id,
                n.title,
                n.message,
                n.category.as_str(),
                n.related.as_ref().map(|r| r.kind.as_str()),
                n.related.as_ref().map(|r| r.id.to_string()),
                n.read,
                n.action.as_ref().map(|a| a.url.as_str()),
                n.action.as_ref().map(|a| a.label.as_str()),
                Self::ts(&n.created_at),
            ],
        )?;
        Ok(())
    }

    fn write_incident(conn: &Connection, incident: &Incident) -> StoreResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO incidents ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                INCIDENT_COLUMNS
            ),
            params![
                incident.id.to_string(),
                incident.reporter_id,
                incident.assigned_administrator_id,
                incident.title,
                incident.status.as_str(),
                Self::ts(&incident.created_at),
                Self::ts(&incident.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Runs `SELECT <columns> FROM <table> [WHERE ...] ORDER BY <order>`
    fn select<T>(
        conn: &Connection,
        table: &str,
        columns: &str,
        clauses: &[String],
        values: &[String],
        order_by: &str,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<Vec<T>> {
        let mut sql = format!("SELECT {} FROM {}", columns, table);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), map)?;
        Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
    }

    fn get_one<T>(
        &self,
        table: &str,
        columns: &str,
        id: &Uuid,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<Option<T>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!("SELECT {} FROM {} WHERE id = ?1", columns, table),
                [id.to_string()],
                map,
            )
            .optional()?;
        Ok(found)
    }

    fn load_all(conn: &Connection) -> StoreResult<LedgerSnapshot> {
        Ok(LedgerSnapshot {
            requests: Self::select(conn, "requests", REQUEST_COLUMNS, &[], &[], "requested_at", Self::request_from_row)?,
            relationships: Self::select(
                conn,
                "relationships",
                RELATIONSHIP_COLUMNS,
                &[],
                &[],
                "established_at",
                Self::relationship_from_row,
            )?,
            notifications: Self::select(
                conn,
                "notifications",
                NOTIFICATION_COLUMNS,
                &[],
                &[],
                "created_at",
                Self::notification_from_row,
            )?,
            incidents: Self::select(conn, "incidents", INCIDENT_COLUMNS, &[], &[], "created_at", Self::incident_from_row)?,
        })
    }

    fn replace_all(conn: &Connection, snapshot: &LedgerSnapshot) -> StoreResult<()> {
        conn.execute("DELETE FROM requests", [])?;
        conn.execute("DELETE FROM relationships", [])?;
        conn.execute("DELETE FROM notifications", [])?;
        conn.execute("DELETE FROM incidents", [])?;

        for request in &snapshot.requests {
            Self::write_request(conn, request)?;
        }
        for relationship in &snapshot.relationships {
            Self::write_relationship(conn, relationship)?;
        }
        for notification in &snapshot.notifications {
            Self::write_notification(conn, notification)?;
        }
        for incident in &snapshot.incidents {
            Self::write_incident(conn, incident)?;
        }
        Ok(())
    }
}

/// Appends `column = ?N` binding `value`
fn push_eq(clauses: &mut Vec<String>, values: &mut Vec<String>, column: &str, value: &str) {
    values.push(value.to_string());
    clauses.push(format!("{} = ?{}", column, values.len()));
}

impl DatabaseBackend for SqliteBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path == Path::new(":memory:") || self.path.exists()
    }

    fn load(&self) -> StoreResult<LedgerSnapshot> {
        let conn = self.conn()?;
        Self::load_all(&conn)
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::replace_all(&tx, snapshot)?;
        tx.commit()?;
        Ok(())
    }

    fn apply(&self, mutation: &mut Mutation<'_>) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut snapshot = Self::load_all(&tx)?;
        // Dropping the transaction on error rolls it back
        let changed = mutation(&mut snapshot)?;
        if changed > 0 {
            Self::replace_all(&tx, &snapshot)?;
        }
        tx.commit()?;
        Ok(changed)
    }

    // Override for native single-statement operations

    fn insert_request(&self, request: &Request) -> StoreResult<()> {
        let conn = self.conn()?;
        Self::write_request(&conn, request)
    }

    fn get_request(&self, id: &Uuid) -> StoreResult<Option<Request>> {
        self.get_one("requests", REQUEST_COLUMNS, id, Self::request_from_row)
    }

    fn list_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<Request>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(requester) = &filter.requester_id {
            push_eq(&mut clauses, &mut values, "requester_id", requester);
        }
        if let Some(target) = &filter.target_id {
            push_eq(&mut clauses, &mut values, "target_id", target);
        }
        if let Some(status) = filter.status {
            push_eq(&mut clauses, &mut values, "status", status.as_str());
        }

        let conn = self.conn()?;
        Self::select(&conn, "requests", REQUEST_COLUMNS, &clauses, &values, "requested_at", Self::request_from_row)
    }

    fn transition_request(&self, id: &Uuid, transition: &RequestTransition) -> StoreResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE requests
             SET status = ?1, responder_id = ?2, response_message = ?3, responded_at = ?4
             WHERE id = ?5 AND status = 'pending'",
            params![
                transition.status.as_str(),
                transition.responder_id,
                transition.response_message,
                transition.responded_at.as_ref().map(Self::ts),
                id.to_string(),
            ],
        )?;
        Ok(changed)
    }

    fn insert_relationship(&self, relationship: &ManagedRelationship) -> StoreResult<()> {
        let conn = self.conn()?;
        Self::write_relationship(&conn, relationship)
    }

    fn get_relationship(&self, id: &Uuid) -> StoreResult<Option<ManagedRelationship>> {
        self.get_one("relationships", RELATIONSHIP_COLUMNS, id, Self::relationship_from_row)
    }

    fn list_relationships(&self, filter: &RelationshipFilter) -> StoreResult<Vec<ManagedRelationship>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(admin) = &filter.administrator_id {
            push_eq(&mut clauses, &mut values, "administrator_id", admin);
        }
        if let Some(member) = &filter.member_id {
            push_eq(&mut clauses, &mut values, "member_id", member);
        }
        if let Some(status) = filter.status {
            push_eq(&mut clauses, &mut values, "status", status.as_str());
        }

        let conn = self.conn()?;
        Self::select(
            &conn,
            "relationships",
            RELATIONSHIP_COLUMNS,
            &clauses,
            &values,
            "established_at",
            Self::relationship_from_row,
        )
    }

    fn update_relationship_status(
        &self,
        id: &Uuid,
        from: RelationshipStatus,
        to: RelationshipStatus,
    ) -> StoreResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE relationships SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to.as_str(), id.to_string(), from.as_str()],
        )?;
        Ok(changed)
    }

    fn end_relationship(&self, id: &Uuid, notes: &str, ended_at: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE relationships SET status = 'inactive', notes = ?1, ended_at = ?2
             WHERE id = ?3 AND status <> 'inactive'",
            params![notes, Self::ts(&ended_at), id.to_string()],
        )?;
        Ok(changed)
    }

    fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        let conn = self.conn()?;
        Self::write_notification(&conn, notification)
    }

    fn get_notification(&self, id: &Uuid) -> StoreResult<Option<Notification>> {
        self.get_one("notifications", NOTIFICATION_COLUMNS, id, Self::notification_from_row)
    }

    fn list_notifications(&self, filter: &NotificationFilter) -> StoreResult<Vec<Notification>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(recipient) = &filter.recipient_id {
            push_eq(&mut clauses, &mut values, "recipient_id", recipient);
        }
        if filter.unread_only {
            clauses.push("is_read = 0".to_string());
        }

        let conn = self.conn()?;
        Self::select(
            &conn,
            "notifications",
            NOTIFICATION_COLUMNS,
            &clauses,
            &values,
            "created_at",
            Self::notification_from_row,
        )
    }

    fn mark_notification_read(&self, id: &Uuid, recipient_id: &str) -> StoreResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
            params![id.to_string(), recipient_id],
        )?;
        Ok(changed)
    }

    fn mark_all_notifications_read(&self, recipient_id: &str) -> StoreResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
            [recipient_id],
        )?;
        Ok(changed)
    }

    fn insert_incident(&self, incident: &Incident) -> StoreResult<()> {
        let conn = self.conn()?;
        Self::write_incident(&conn, incident)
    }

    fn get_incident(&self, id: &Uuid) -> StoreResult<Option<Incident>> {
        self.get_one("incidents", INCIDENT_COLUMNS, id, Self::incident_from_row)
    }

    fn list_incidents(&self, filter: &IncidentFilter) -> StoreResult<Vec<Incident>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(admin) = &filter.assigned_administrator_id {
            push_eq(&mut clauses, &mut values, "assigned_administrator_id", admin);
        }
        if filter.unassigned_only {
            clauses.push("assigned_administrator_id IS NULL".to_string());
        }

        let conn = self.conn()?;
        let reporters = match &filter.reporter_ids {
            None => {
                return Self::select(
                    &conn,
                    "incidents",
                    INCIDENT_COLUMNS,
                    &clauses,
                    &values,
                    "created_at",
                    Self::incident_from_row,
                )
            }
            Some(reporters) => reporters,
        };

        let mut incidents = Vec::new();
        for chunk in reporters.chunks(MAX_BOUND_IDS) {
            let mut chunk_clauses = clauses.clone();
            let mut chunk_values = values.clone();
            let mut placeholders = Vec::with_capacity(chunk.len());
            for reporter in chunk {
                chunk_values.push(reporter.clone());
                placeholders.push(format!("?{}", chunk_values.len()));
            }
            chunk_clauses.push(format!("reporter_id IN ({})", placeholders.join(", ")));

            incidents.extend(Self::select(
                &conn,
                "incidents",
                INCIDENT_COLUMNS,
                &chunk_clauses,
                &chunk_values,
                "created_at",
                Self::incident_from_row,
            )?);
        }
        if reporters.len() > MAX_BOUND_IDS {
            incidents.sort_by_key(|i| i.created_at);
        }
        Ok(incidents)
    }

    fn claim_incidents(
        &self,
        administrator_id: &str,
        ids: &[Uuid],
        claimed_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let claimed_at = Self::ts(&claimed_at);
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut changed = 0;
        for chunk in ids.chunks(MAX_BOUND_IDS) {
            let mut values = vec![administrator_id.to_string(), claimed_at.clone()];
            let mut placeholders = Vec::with_capacity(chunk.len());
            for id in chunk {
                values.push(id.to_string());
                placeholders.push(format!("?{}", values.len()));
            }

            // The IS NULL predicate makes concurrent claim passes race safely
            let sql = format!(
                "UPDATE incidents SET assigned_administrator_id = ?1, updated_at = ?2
                 WHERE assigned_administrator_id IS NULL AND id IN ({})",
                placeholders.join(", ")
            );
            changed += tx.execute(&sql, params_from_iter(values.iter()))?;
        }

        tx.commit()?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sqlite_backend_create_and_load() {
        let temp_file = NamedTempFile::with_suffix(".db").unwrap();
        let backend = SqliteBackend::new(temp_file.path()).unwrap();

        backend.create_if_not_exists().unwrap();

        let snapshot = backend.load().unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_sqlite_backend_reopens_existing_schema() {
        let temp_file = NamedTempFile::with_suffix(".db").unwrap();
        let request = Request::new("m1", "a1");
        {
            let backend = SqliteBackend::new(temp_file.path()).unwrap();
            backend.insert_request(&request).unwrap();
        }

        let backend = SqliteBackend::new(temp_file.path()).unwrap();
        assert_eq!(backend.get_request(&request.id).unwrap(), Some(request));
    }

    #[test]
    fn test_sqlite_backend_save_and_load() {
        let backend = SqliteBackend::in_memory().unwrap();

        let mut snapshot = LedgerSnapshot::new();
        snapshot.requests.push(Request::new("m1", "a1").with_message(Some("hello".into())));
        snapshot.relationships.push(ManagedRelationship::new("a2", "m2", "a2"));
        snapshot.notifications.push(
            crate::models::NewNotification::new("a1", NotificationCategory::AdminRequest, "t", "m")
                .related(EntityKind::Request, snapshot.requests[0].id)
                .action("/requests/1", "Review request")
                .into_notification(),
        );
        snapshot.incidents.push(Incident::new("m2", "Broken gate"));

        backend.save(&snapshot).unwrap();

        let loaded = backend.load().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_pending_uniqueness_is_enforced_by_index() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.insert_request(&Request::new("m1", "a1")).unwrap();

        let err = backend.insert_request(&Request::new("m1", "a1")).unwrap_err();
        assert!(err.is_conflict());

        // A terminal request for the same pair does not block a new one
        let mut old = Request::new("m1", "a2");
        old.status = RequestStatus::Rejected;
        backend.insert_request(&old).unwrap();
        backend.insert_request(&Request::new("m1", "a2")).unwrap();
    }

    #[test]
    fn test_transition_only_applies_to_pending() {
        let backend = SqliteBackend::in_memory().unwrap();
        let request = Request::new("m1", "a1");
        backend.insert_request(&request).unwrap();

        let accept = RequestTransition::resolve(crate::models::Decision::Accepted, "a1", None);
        assert_eq!(backend.transition_request(&request.id, &accept).unwrap(), 1);
        assert_eq!(backend.transition_request(&request.id, &RequestTransition::cancel()).unwrap(), 0);

        let stored = backend.get_request(&request.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert_eq!(stored.responder_id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_active_relationship_uniqueness_and_resume_conflict() {
        let backend = SqliteBackend::in_memory().unwrap();
        let first = ManagedRelationship::new("a1", "m1", "a1");
        backend.insert_relationship(&first).unwrap();
        assert!(backend
            .insert_relationship(&ManagedRelationship::new("a1", "m1", "a1"))
            .unwrap_err()
            .is_conflict());

        assert_eq!(
            backend
                .update_relationship_status(&first.id, RelationshipStatus::Active, RelationshipStatus::Suspended)
                .unwrap(),
            1
        );
        let second = ManagedRelationship::new("a1", "m1", "a1");
        backend.insert_relationship(&second).unwrap();

        let err = backend
            .update_relationship_status(&first.id, RelationshipStatus::Suspended, RelationshipStatus::Active)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_claim_skips_already_assigned() {
        let backend = SqliteBackend::in_memory().unwrap();
        let open = Incident::new("m1", "Leak");
        let mut taken = Incident::new("m1", "Noise");
        taken.assigned_administrator_id = Some("a9".into());
        backend.insert_incident(&open).unwrap();
        backend.insert_incident(&taken).unwrap();

        let claimed = backend
            .claim_incidents("a1", &[open.id, taken.id], Utc::now())
            .unwrap();
        assert_eq!(claimed, 1);
        assert_eq!(
            backend.get_incident(&taken.id).unwrap().unwrap().assigned_administrator_id.as_deref(),
            Some("a9")
        );
        assert_eq!(backend.claim_incidents("a1", &[open.id], Utc::now()).unwrap(), 0);
    }

    #[test]
    fn test_incident_filter_by_reporters() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.insert_incident(&Incident::new("m1", "one")).unwrap();
        backend.insert_incident(&Incident::new("m2", "two")).unwrap();
        backend.insert_incident(&Incident::new("m3", "three")).unwrap();

        let found = backend
            .list_incidents(&IncidentFilter::new().reporters(["m1", "m3"]).unassigned())
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|i| i.reporter_id != "m2"));
        assert!(backend
            .list_incidents(&IncidentFilter::new().reporters(Vec::<String>::new()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_reopen_keeps_single_schema_version_row() {
        let temp_file = NamedTempFile::with_suffix(".db").unwrap();
        for _ in 0..3 {
            SqliteBackend::new(temp_file.path()).unwrap();
        }

        let backend = SqliteBackend::new(temp_file.path()).unwrap();
        let conn = backend.conn().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_claim_more_ids_than_one_statement_can_bind() {
        let backend = SqliteBackend::in_memory().unwrap();
        let mut snapshot = LedgerSnapshot::new();
        snapshot.incidents = (0..33_000).map(|n| Incident::new("m1", format!("incident {n}"))).collect();
        backend.save(&snapshot).unwrap();

        let ids: Vec<Uuid> = snapshot.incidents.iter().map(|i| i.id).collect();
        assert_eq!(backend.claim_incidents("a1", &ids, Utc::now()).unwrap(), 33_000);
        assert_eq!(backend.claim_incidents("a2", &ids, Utc::now()).unwrap(), 0);
        assert_eq!(
            backend
                .list_incidents(&IncidentFilter::new().assigned_to("a1"))
                .unwrap()
                .len(),
            33_000
        );
    }

    #[test]
    fn test_incident_filter_with_many_reporters_stays_ordered() {
        let backend = SqliteBackend::in_memory().unwrap();
        let reporters: Vec<String> = (0..1_200).map(|n| format!("m{n}")).collect();
        let start = Utc::now();
        let mut snapshot = LedgerSnapshot::new();
        snapshot.incidents = reporters
            .iter()
            .rev()
            .enumerate()
            .map(|(n, reporter)| {
                let mut incident = Incident::new(reporter.as_str(), "report");
                incident.created_at = start + chrono::Duration::seconds(n as i64);
                incident
            })
            .collect();
        backend.save(&snapshot).unwrap();

        let found = backend
            .list_incidents(&IncidentFilter::new().reporters(reporters.clone()).unassigned())
            .unwrap();
        assert_eq!(found.len(), 1_200);
        assert!(found.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }
}
