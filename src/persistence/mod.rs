//! Durable storage, spec.md §6 / §10.
//!
//! Grounded in the teacher's `signals::db_storage::DbSignalStorage`: WAL
//! mode, a schema-as-const-`&str` batch, and a single `parking_lot::Mutex`
//! guarding one `rusqlite::Connection`. The teacher's FTS5 search index and
//! per-signal enrichment tables have no counterpart here and are not
//! carried over; the serialize-everything-behind-one-mutex shape is kept
//! because it also gives the refund cumulative-bound check (spec.md §4.7)
//! its required per-payment-key serialization for free.

mod alerts;
mod events;
mod refunds;
mod transactions;

pub use refunds::ReserveOutcome;

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use crate::error::StoreError;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS transactions (
    idempotency_key TEXT PRIMARY KEY,
    transaction_id TEXT NOT NULL UNIQUE,
    provider_type TEXT NOT NULL,
    status TEXT NOT NULL,
    amount_minor_units INTEGER NOT NULL,
    currency_code TEXT NOT NULL,
    provider_transaction_id TEXT,
    failure_code TEXT,
    message TEXT,
    merchant_reference TEXT NOT NULL,
    customer_id TEXT,
    email TEXT,
    client_ip TEXT,
    card_identity_json TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_transactions_merchant_ref
    ON transactions(merchant_reference, created_at DESC);

CREATE TABLE IF NOT EXISTS refunds (
    idempotency_key TEXT PRIMARY KEY,
    payment_idempotency_key TEXT NOT NULL REFERENCES transactions(idempotency_key),
    status TEXT NOT NULL,
    amount_minor_units INTEGER NOT NULL,
    currency_code TEXT NOT NULL,
    provider_transaction_id TEXT,
    failure_code TEXT,
    message TEXT,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_refunds_payment_key
    ON refunds(payment_idempotency_key, status);

CREATE TABLE IF NOT EXISTS payment_events (
    event_id TEXT PRIMARY KEY,
    idempotency_key TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_payment_events_key
    ON payment_events(idempotency_key, created_at);

-- Consumer-side dedup ledger, spec.md §4.8 ("consumer-side idempotency is
-- by eventId"); a child of payment_events rather than its own subsystem.
CREATE TABLE IF NOT EXISTS processed_events (
    event_id TEXT PRIMARY KEY,
    processed_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS risk_alerts (
    alert_id TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    level TEXT NOT NULL,
    risk_score REAL NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_risk_alerts_created_at
    ON risk_alerts(created_at DESC);

-- Webhook subscriptions, a child of risk_alerts' entity keyspace rather
-- than a subsystem of its own.
CREATE TABLE IF NOT EXISTS webhook_subscriptions (
    entity_id TEXT NOT NULL,
    webhook_url TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (entity_id, webhook_url)
) WITHOUT ROWID;
"#;

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(database_path: &str) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(database_path, flags)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(database_path, "persistence store initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Used by the test suite, and as the fallback store for `AlertHub`'s
    /// `Default` impl when no durable path has been configured.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}
