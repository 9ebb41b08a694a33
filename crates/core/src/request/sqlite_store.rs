//! SQLite-backed request store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{
    DeliveryRecord, NewRequest, Request, RequestStore, Requester, StoreError, DEFAULT_PRIORITY,
};

const REQUEST_COLUMNS: &str = "r.id, r.locator, r.display_name, r.size_bytes, r.created_at, \
     r.claimed_at, r.started_at, r.finished_at, r.bytes_completed, r.last_error, r.delivery_ref";

/// SQLite-backed request store.
pub struct SqliteRequestStore {
    conn: Mutex<Connection>,
    /// Claims older than this become eligible again (None = never).
    reclaim_after: Option<Duration>,
}

impl SqliteRequestStore {
    /// Create a new SQLite request store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            reclaim_after: None,
        })
    }

    /// Create an in-memory SQLite request store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            reclaim_after: None,
        })
    }

    /// Make requests whose claim is older than `grace` and which never
    /// finished eligible for claiming again.
    pub fn with_reclaim_after(mut self, grace: Duration) -> Self {
        self.reclaim_after = Some(grace);
        self
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                locator TEXT NOT NULL UNIQUE,
                display_name TEXT,
                size_bytes INTEGER,
                created_at TEXT NOT NULL,
                claimed_at TEXT,
                started_at TEXT,
                finished_at TEXT,
                bytes_completed INTEGER,
                last_error TEXT,
                delivery_ref TEXT
            );

            CREATE TABLE IF NOT EXISTS requesters (
                id TEXT PRIMARY KEY,
                priority INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS request_requesters (
                request_id TEXT NOT NULL REFERENCES requests(id),
                requester_id TEXT NOT NULL REFERENCES requesters(id),
                delivered INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (request_id, requester_id)
            );

            CREATE INDEX IF NOT EXISTS idx_requests_created_at ON requests(created_at);
            CREATE INDEX IF NOT EXISTS idx_requests_finished_at ON requests(finished_at);
            CREATE INDEX IF NOT EXISTS idx_request_requesters_requester
                ON request_requesters(requester_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<Request> {
        let size_bytes: Option<i64> = row.get(3)?;
        let bytes_completed: Option<i64> = row.get(8)?;

        Ok(Request {
            id: row.get(0)?,
            locator: row.get(1)?,
            display_name: row.get(2)?,
            size_bytes: size_bytes.map(|v| v as u64),
            created_at: parse_ts(4, row.get(4)?)?,
            claimed_at: parse_opt_ts(5, row.get(5)?)?,
            started_at: parse_opt_ts(6, row.get(6)?)?,
            finished_at: parse_opt_ts(7, row.get(7)?)?,
            bytes_completed: bytes_completed.map(|v| v as u64),
            last_error: row.get(9)?,
            delivery_ref: row.get(10)?,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Request>, StoreError> {
        let request = conn
            .query_row(
                &format!("SELECT {} FROM requests r WHERE r.id = ?1", REQUEST_COLUMNS),
                params![id],
                Self::row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    /// Explain why a conditional write matched no row.
    fn check_writable(conn: &Connection, id: &str) -> Result<(), StoreError> {
        let delivery_ref: Option<Option<String>> = conn
            .query_row(
                "SELECT delivery_ref FROM requests WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match delivery_ref {
            None => Err(StoreError::NotFound(id.to_string())),
            Some(Some(_)) => Err(StoreError::AlreadyDelivered(id.to_string())),
            Some(None) => Ok(()),
        }
    }

    fn reclaim_cutoff(&self, now: DateTime<Utc>) -> Result<Option<String>, StoreError> {
        self.reclaim_after
            .map(|grace| {
                chrono::Duration::from_std(grace)
                    .map(|grace| ts(&(now - grace)))
                    .map_err(|e| StoreError::Database(format!("invalid reclaim grace: {}", e)))
            })
            .transpose()
    }
}

impl RequestStore for SqliteRequestStore {
    fn create_request(&self, request: NewRequest) -> Result<Request, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO requesters (id, priority) VALUES (?1, ?2)",
            params![request.requester_id, DEFAULT_PRIORITY],
        )?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {} FROM requests r WHERE r.locator = ?1",
                    REQUEST_COLUMNS
                ),
                params![request.locator],
                Self::row_to_request,
            )
            .optional()?;

        let id = match existing {
            Some(existing) if existing.delivery_ref.is_none() && existing.finished_at.is_some() => {
                // A failed request asked for again goes back to the queue.
                tx.execute(
                    "UPDATE requests SET claimed_at = NULL, started_at = NULL, finished_at = NULL, \
                     bytes_completed = NULL, last_error = NULL WHERE id = ?1",
                    params![existing.id],
                )?;
                debug!(request_id = %existing.id, "Re-queued failed request");
                existing.id
            }
            Some(existing) => existing.id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let created_at = request.created_at.unwrap_or_else(Utc::now);
                tx.execute(
                    "INSERT INTO requests (id, locator, created_at) VALUES (?1, ?2, ?3)",
                    params![id, request.locator, ts(&created_at)],
                )?;
                id
            }
        };

        tx.execute(
            "INSERT OR IGNORE INTO request_requesters (request_id, requester_id, delivered) \
             VALUES (?1, ?2, 0)",
            params![id, request.requester_id],
        )?;

        let created = Self::fetch(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
        tx.commit()?;

        Ok(created)
    }

    fn get(&self, id: &str) -> Result<Option<Request>, StoreError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn list_for_requester(&self, requester_id: &str) -> Result<Vec<Request>, StoreError> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM requests r \
             INNER JOIN request_requesters rr ON rr.request_id = r.id \
             WHERE rr.requester_id = ?1 \
             ORDER BY r.created_at ASC, r.rowid ASC",
            REQUEST_COLUMNS
        ))?;

        let rows = stmt.query_map(params![requester_id], Self::row_to_request)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    fn upsert_requester(&self, id: &str, priority: i32) -> Result<Requester, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO requesters (id, priority) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET priority = excluded.priority",
            params![id, priority],
        )?;
        Ok(Requester {
            id: id.to_string(),
            priority,
        })
    }

    fn get_requester(&self, id: &str) -> Result<Option<Requester>, StoreError> {
        let conn = self.conn()?;
        let requester = conn
            .query_row(
                "SELECT id, priority FROM requesters WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Requester {
                        id: row.get(0)?,
                        priority: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(requester)
    }

    fn next_eligible_request(&self) -> Result<Option<Request>, StoreError> {
        let now = Utc::now();
        let cutoff = self.reclaim_cutoff(now)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let candidate: Option<String> = tx
            .query_row(
                &format!(
                    "SELECT r.id FROM requests r \
                     LEFT JOIN request_requesters rr ON rr.request_id = r.id \
                     LEFT JOIN requesters q ON q.id = rr.requester_id \
                     WHERE r.finished_at IS NULL AND r.delivery_ref IS NULL \
                       AND (r.claimed_at IS NULL OR (?1 IS NOT NULL AND r.claimed_at < ?1)) \
                     GROUP BY r.id \
                     ORDER BY r.created_at ASC, COALESCE(MAX(q.priority), {}) DESC, r.rowid ASC \
                     LIMIT 1",
                    DEFAULT_PRIORITY
                ),
                params![cutoff],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        // Conditional update: only one caller can move claimed_at forward.
        let claimed = tx.execute(
            "UPDATE requests SET claimed_at = ?1 \
             WHERE id = ?2 AND finished_at IS NULL AND delivery_ref IS NULL \
               AND (claimed_at IS NULL OR (?3 IS NOT NULL AND claimed_at < ?3))",
            params![ts(&now), id, cutoff],
        )?;

        if claimed == 0 {
            return Ok(None);
        }

        let request = Self::fetch(&tx, &id)?;
        tx.commit()?;

        Ok(request)
    }

    fn update_preflight(
        &self,
        id: &str,
        name: &str,
        size_bytes: u64,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE requests SET display_name = ?1, size_bytes = ?2, started_at = ?3, \
             bytes_completed = 0, last_error = NULL \
             WHERE id = ?4 AND delivery_ref IS NULL",
            params![name, size_bytes as i64, ts(&started_at), id],
        )?;

        if updated == 0 {
            Self::check_writable(&conn, id)?;
        }
        Ok(())
    }

    fn record_progress(&self, id: &str, bytes_completed: u64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE requests SET bytes_completed = ?1 WHERE id = ?2 AND finished_at IS NULL",
            params![bytes_completed as i64, id],
        )?;

        // Late progress for a finished request is dropped silently.
        if updated == 0 && Self::fetch(&conn, id)?.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn update_postflight(
        &self,
        id: &str,
        delivery_ref: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE requests SET delivery_ref = ?1, finished_at = ?2, last_error = NULL, \
             bytes_completed = COALESCE(size_bytes, bytes_completed) \
             WHERE id = ?3 AND (delivery_ref IS NULL OR delivery_ref = ?1)",
            params![delivery_ref, ts(&finished_at), id],
        )?;

        if updated == 0 {
            Self::check_writable(&conn, id)?;
        }
        Ok(())
    }

    fn record_failure(
        &self,
        id: &str,
        error_text: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE requests SET last_error = ?1, finished_at = ?2 \
             WHERE id = ?3 AND delivery_ref IS NULL",
            params![error_text, ts(&finished_at), id],
        )?;

        if updated == 0 {
            Self::check_writable(&conn, id)?;
        }
        Ok(())
    }

    fn undelivered_requesters(&self, request_id: &str) -> Result<Vec<Requester>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT q.id, q.priority FROM request_requesters rr \
             INNER JOIN requesters q ON q.id = rr.requester_id \
             WHERE rr.request_id = ?1 AND rr.delivered = 0 \
             ORDER BY q.priority DESC, q.id ASC",
        )?;

        let rows = stmt.query_map(params![request_id], |row| {
            Ok(Requester {
                id: row.get(0)?,
                priority: row.get(1)?,
            })
        })?;

        let mut requesters = Vec::new();
        for row in rows {
            requesters.push(row?);
        }
        Ok(requesters)
    }

    fn mark_delivered(&self, request_id: &str, requester_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE request_requesters SET delivered = 1 \
             WHERE request_id = ?1 AND requester_id = ?2",
            params![request_id, requester_id],
        )?;

        if updated == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM requests WHERE id = ?1)",
                params![request_id],
                |row| row.get(0),
            )?;
            return Err(if exists {
                StoreError::RequesterNotFound(requester_id.to_string())
            } else {
                StoreError::NotFound(request_id.to_string())
            });
        }
        Ok(())
    }

    fn delivery_records(&self, request_id: &str) -> Result<Vec<DeliveryRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT request_id, requester_id, delivered FROM request_requesters \
             WHERE request_id = ?1 ORDER BY requester_id ASC",
        )?;

        let rows = stmt.query_map(params![request_id], |row| {
            Ok(DeliveryRecord {
                request_id: row.get(0)?,
                requester_id: row.get(1)?,
                delivered: row.get(2)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

/// Fixed-width RFC 3339 so that lexical order matches chronological order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, v)).transpose()
}
