use chrono::{DateTime, Utc};

pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    sender_id    TEXT PRIMARY KEY,
    display_name TEXT NOT NULL DEFAULT '',
    cellphone    TEXT NOT NULL UNIQUE,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tickets (
    submission_id INTEGER PRIMARY KEY AUTOINCREMENT,
    cellphone     TEXT NOT NULL,
    ticket_number TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    UNIQUE (cellphone, ticket_number)
);

CREATE INDEX IF NOT EXISTS idx_tickets_cellphone ON tickets (cellphone);
";

/// A row in `users`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredUser {
    pub sender_id: String,
    pub display_name: String,
    pub cellphone: String,
    pub created_at: DateTime<Utc>,
}

/// A row in `tickets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRecord {
    pub submission_id: i64,
    pub cellphone: String,
    pub ticket_number: String,
    pub created_at: DateTime<Utc>,
}
