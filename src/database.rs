//! SQLite persistence.
//!
//! The schema is applied at startup. Uniqueness that matters for
//! correctness under concurrent requests lives here as composite unique
//! indexes rather than only as check-then-insert logic in the handlers:
//! one vote per (poll, principal), one token per (voter, poll), and a
//! globally unique vote transaction signature.

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS admins (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    wallet_address TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS voters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    voter_id TEXT NOT NULL UNIQUE,
    username TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    national_id_hash TEXT NOT NULL,
    national_id_digest TEXT NOT NULL UNIQUE,
    issue_date TEXT NOT NULL,
    wallet_address TEXT NOT NULL UNIQUE,
    is_eligible INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS polls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    poll_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    creator_id INTEGER NOT NULL REFERENCES admins(id),
    blockchain_address TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS options (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    poll_id INTEGER NOT NULL REFERENCES polls(id),
    option_text TEXT NOT NULL,
    option_index INTEGER NOT NULL,
    description TEXT,
    image_url TEXT,
    UNIQUE (poll_id, option_index)
);

CREATE TABLE IF NOT EXISTS votes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    poll_id INTEGER NOT NULL REFERENCES polls(id),
    principal_role TEXT NOT NULL,
    principal_id INTEGER NOT NULL,
    option_index INTEGER NOT NULL,
    transaction_signature TEXT NOT NULL UNIQUE,
    wallet_address TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (poll_id, principal_role, principal_id)
);

CREATE TABLE IF NOT EXISTS voting_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token_id TEXT NOT NULL UNIQUE,
    voter_id INTEGER NOT NULL REFERENCES voters(id),
    voter_wallet_address TEXT NOT NULL,
    poll_id INTEGER NOT NULL REFERENCES polls(id),
    status TEXT NOT NULL DEFAULT 'minted',
    minted_by INTEGER NOT NULL REFERENCES admins(id),
    mint_transaction_signature TEXT NOT NULL,
    transfer_transaction_signature TEXT,
    minted_at TEXT NOT NULL,
    collected_at TEXT,
    UNIQUE (voter_id, poll_id)
);
";

pub async fn init_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    apply_schema(&pool).await?;

    Ok(pool)
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// In-memory database for tests. A single connection keeps every query on
/// the same `:memory:` instance.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    apply_schema(&pool).await.expect("schema");

    pool
}
