//! Table definitions for both backends.
//!
//! Column sets are identical; only the type names differ.

/// Postgres: raw audit trail, insert-only.
pub const PG_CREATE_RAW_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS raw_transactions (
    transaction_id TEXT PRIMARY KEY,
    event_ts TIMESTAMPTZ NOT NULL,
    payload JSONB NOT NULL,
    ingested_at TIMESTAMPTZ NOT NULL
)
"#;

/// Postgres: curated query table.
pub const PG_CREATE_TRANSACTIONS_FLAT: &str = r#"
CREATE TABLE IF NOT EXISTS transactions_flat (
    transaction_id TEXT PRIMARY KEY,
    event_ts TIMESTAMPTZ NOT NULL,
    event_date DATE NOT NULL,
    event_hour INTEGER NOT NULL,
    event_dayofweek TEXT NOT NULL,
    user_id BIGINT NOT NULL,
    amount DOUBLE PRECISION NOT NULL,
    amount_bucket TEXT NOT NULL,
    merchant TEXT,
    category TEXT,
    city TEXT,
    status TEXT,
    payment_method TEXT,
    currency TEXT NOT NULL DEFAULT 'EUR',
    ingested_at TIMESTAMPTZ NOT NULL
)
"#;

/// Postgres: quarantined batches.
pub const PG_CREATE_REJECTED_BATCHES: &str = r#"
CREATE TABLE IF NOT EXISTS rejected_batches (
    batch_key TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    start_position BIGINT NOT NULL,
    end_position BIGINT NOT NULL,
    reason TEXT NOT NULL,
    payloads JSONB NOT NULL,
    rejected_at TIMESTAMPTZ NOT NULL
)
"#;

/// SQLite: raw audit trail, insert-only.
pub const SQLITE_CREATE_RAW_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS raw_transactions (
    transaction_id TEXT PRIMARY KEY NOT NULL,
    event_ts TEXT NOT NULL,
    payload TEXT NOT NULL,
    ingested_at TEXT NOT NULL
)
"#;

/// SQLite: curated query table.
pub const SQLITE_CREATE_TRANSACTIONS_FLAT: &str = r#"
CREATE TABLE IF NOT EXISTS transactions_flat (
    transaction_id TEXT PRIMARY KEY NOT NULL,
    event_ts TEXT NOT NULL,
    event_date TEXT NOT NULL,
    event_hour INTEGER NOT NULL,
    event_dayofweek TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    amount REAL NOT NULL,
    amount_bucket TEXT NOT NULL,
    merchant TEXT,
    category TEXT,
    city TEXT,
    status TEXT,
    payment_method TEXT,
    currency TEXT NOT NULL DEFAULT 'EUR',
    ingested_at TEXT NOT NULL
)
"#;

/// SQLite: quarantined batches.
pub const SQLITE_CREATE_REJECTED_BATCHES: &str = r#"
CREATE TABLE IF NOT EXISTS rejected_batches (
    batch_key TEXT PRIMARY KEY NOT NULL,
    source TEXT NOT NULL,
    start_position INTEGER NOT NULL,
    end_position INTEGER NOT NULL,
    reason TEXT NOT NULL,
    payloads TEXT NOT NULL,
    rejected_at TEXT NOT NULL
)
"#;

/// Secondary indexes; same syntax on both backends.
pub const CREATE_INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS idx_transactions_flat_user_id ON transactions_flat (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_flat_event_ts ON transactions_flat (event_ts)",
];

/// Postgres DDL in execution order.
pub fn postgres_tables() -> Vec<&'static str> {
    let mut ddl = vec![
        PG_CREATE_RAW_TRANSACTIONS,
        PG_CREATE_TRANSACTIONS_FLAT,
        PG_CREATE_REJECTED_BATCHES,
    ];
    ddl.extend(CREATE_INDEXES);
    ddl
}

/// SQLite DDL in execution order.
pub fn sqlite_tables() -> Vec<&'static str> {
    let mut ddl = vec![
        SQLITE_CREATE_RAW_TRANSACTIONS,
        SQLITE_CREATE_TRANSACTIONS_FLAT,
        SQLITE_CREATE_REJECTED_BATCHES,
    ];
    ddl.extend(CREATE_INDEXES);
    ddl
}
