//! Persistence for registered users and committed ticket batches.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum DbError {
    /// Insert rejected by a uniqueness constraint.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    /// Transient failure, the statement may succeed on retry.
    #[error("Database busy: {0}")]
    Busy(rusqlite::Error),
    #[error("Database error: {0}")]
    Sqlite(rusqlite::Error),
}

impl DbError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                rusqlite::ErrorCode::ConstraintViolation => Self::DuplicateKey(e.to_string()),
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    Self::Busy(e)
                }
                _ => Self::Sqlite(e),
            },
            _ => Self::Sqlite(e),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path).map_err(DbError::Sqlite)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory().map_err(DbError::Sqlite)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA).map_err(DbError::from)?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// Look up the registration for a chat sender, if any.
    pub fn find_user_by_sender(&self, sender_id: &str) -> DbResult<Option<RegisteredUser>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT sender_id, display_name, cellphone, created_at
             FROM users WHERE sender_id = ?1",
        )?;

        let mut rows = stmt.query_map(params![sender_id], parse_user_row)?;
        rows.next().transpose().map_err(DbError::from)
    }

    /// Register a sender under a cellphone. A `DuplicateKey` error means the
    /// sender or the cellphone is already taken.
    pub fn insert_user(
        &self,
        sender_id: &str,
        display_name: &str,
        cellphone: &str,
    ) -> DbResult<RegisteredUser> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO users (sender_id, display_name, cellphone, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![sender_id, display_name, cellphone, now.to_rfc3339()],
        )?;

        Ok(RegisteredUser {
            sender_id: sender_id.to_string(),
            display_name: display_name.to_string(),
            cellphone: cellphone.to_string(),
            created_at: now,
        })
    }

    // ==================== Ticket Operations ====================

    /// Insert one ticket number. `DuplicateKey` means this cellphone already
    /// holds this number.
    pub fn insert_ticket(
        &self,
        cellphone: &str,
        ticket_number: &str,
        submitted_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tickets (cellphone, ticket_number, created_at)
             VALUES (?1, ?2, ?3)",
            params![cellphone, ticket_number, submitted_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Re-read the tickets a batch could have produced: rows for this
    /// cellphone whose number is in `numbers` or which were created after
    /// `submitted_at`.
    pub fn tickets_for_batch(
        &self,
        cellphone: &str,
        numbers: &[String],
        submitted_at: DateTime<Utc>,
    ) -> DbResult<Vec<TicketRecord>> {
        let conn = self.conn.lock().unwrap();
        // SQLite rejects an empty IN list.
        let placeholders = if numbers.is_empty() {
            "NULL".to_string()
        } else {
            vec!["?"; numbers.len()].join(", ")
        };
        let sql = format!(
            "SELECT submission_id, cellphone, ticket_number, created_at
             FROM tickets
             WHERE cellphone = ? AND (ticket_number IN ({placeholders}) OR created_at > ?)
             ORDER BY submission_id ASC"
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(numbers.len() + 2);
        let submitted_str = submitted_at.to_rfc3339();
        values.push(&cellphone);
        for n in numbers {
            values.push(n);
        }
        values.push(&submitted_str);

        let rows = stmt.query_map(values.as_slice(), parse_ticket_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Commit a confirmed batch of ticket numbers for a cellphone.
    ///
    /// Never fails as a whole: duplicates and per-item errors are tolerated
    /// and the rest of the batch still commits. Returns the numbers that are
    /// newly recorded, in submission order.
    pub fn commit_batch(
        &self,
        cellphone: &str,
        numbers: &[String],
        submitted_at: DateTime<Utc>,
    ) -> Vec<String> {
        // Dedupe within the batch, preserving first-seen order.
        let mut candidates: Vec<String> = Vec::with_capacity(numbers.len());
        for n in numbers {
            if !candidates.contains(n) {
                candidates.push(n.clone());
            }
        }

        let mut survivors = candidates.clone();
        let mut inserted_ok: Vec<String> = Vec::new();

        for number in &candidates {
            match self.insert_ticket(cellphone, number, submitted_at) {
                Ok(()) => inserted_ok.push(number.clone()),
                Err(e) if e.is_duplicate() => {
                    survivors.retain(|n| n != number);
                }
                Err(e) if e.is_transient() => {
                    warn!(cellphone, number, error = %e, "transient insert failure, continuing batch");
                }
                Err(e) => {
                    warn!(cellphone, number, error = %e, "ticket insert failed, continuing batch");
                }
            }
        }

        // Confirm against what is durably present. A number counts as newly
        // committed only if it survived duplicate filtering AND shows up in
        // the re-read.
        match self.tickets_for_batch(cellphone, &candidates, submitted_at) {
            Ok(rows) => survivors
                .into_iter()
                .filter(|n| rows.iter().any(|r| &r.ticket_number == n))
                .collect(),
            Err(e) => {
                warn!(cellphone, error = %e, "batch re-read failed, reporting per-insert results");
                inserted_ok
            }
        }
    }
}

fn parse_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RegisteredUser> {
    Ok(RegisteredUser {
        sender_id: row.get(0)?,
        display_name: row.get(1)?,
        cellphone: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn parse_ticket_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TicketRecord> {
    Ok(TicketRecord {
        submission_id: row.get(0)?,
        cellphone: row.get(1)?,
        ticket_number: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
