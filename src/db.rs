//! Database connection, schema bootstrap and transaction boundaries.
//!
//! Supports a local SQLite file: `path/to/db.sqlite`, `file:path` or
//! `sqlite://path`. Every connection handed out by [`connection`] waits up to
//! the configured busy timeout for the writer lock, so a second mutation of
//! the tree blocks until the first one commits instead of interleaving.

use std::sync::Arc;
use std::time::Duration;

use libsql::{Builder, Connection, Database, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use crate::error::Result;

/// Shared database handle.
pub type Handle = Arc<Database>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS spaces (
    id TEXT PRIMARY KEY,
    default_level TEXT NOT NULL DEFAULT 'full_access',
    default_public INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS space_members (
    space_id TEXT NOT NULL REFERENCES spaces(id),
    user_id TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (space_id, user_id)
);

CREATE TABLE IF NOT EXISTS roles (
    id TEXT PRIMARY KEY,
    space_id TEXT NOT NULL REFERENCES spaces(id),
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS role_members (
    role_id TEXT NOT NULL REFERENCES roles(id),
    user_id TEXT NOT NULL,
    PRIMARY KEY (role_id, user_id)
);

CREATE TABLE IF NOT EXISTS pages (
    id TEXT PRIMARY KEY,
    space_id TEXT NOT NULL REFERENCES spaces(id),
    parent_id TEXT REFERENCES pages(id),
    idx INTEGER NOT NULL DEFAULT 0,
    title TEXT NOT NULL DEFAULT '',
    created_by TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS pages_parent ON pages(parent_id);

CREATE TABLE IF NOT EXISTS page_permissions (
    id TEXT PRIMARY KEY,
    page_id TEXT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    permission_level TEXT NOT NULL,
    user_id TEXT,
    role_id TEXT,
    space_id TEXT,
    public INTEGER,
    inherited_from TEXT
);
CREATE INDEX IF NOT EXISTS page_permissions_page ON page_permissions(page_id);
CREATE INDEX IF NOT EXISTS page_permissions_source ON page_permissions(inherited_from);
CREATE UNIQUE INDEX IF NOT EXISTS page_permissions_user
    ON page_permissions(page_id, user_id) WHERE user_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS page_permissions_role
    ON page_permissions(page_id, role_id) WHERE role_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS page_permissions_space
    ON page_permissions(page_id, space_id) WHERE space_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS page_permissions_public
    ON page_permissions(page_id) WHERE public IS NOT NULL;
";

/// Open the database and make sure the schema exists.
///
/// # URL formats
/// - Local file: `mydata.db`, `file:path/to/db.sqlite`, `sqlite://path`
pub async fn connect(url: &str) -> Result<Handle> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("file:"))
        .unwrap_or(url);
    let db = Builder::new_local(path).build().await?;

    let conn = db.connect()?;
    conn.execute_batch(SCHEMA).await?;
    debug!(path, "database schema ready");

    Ok(Arc::new(db))
}

/// Get a connection that waits up to `busy_timeout` for locks.
pub fn connection(db: &Database, busy_timeout: Duration) -> Result<Connection> {
    let conn = db.connect()?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

/// Open a transaction that takes the writer lock immediately.
pub async fn begin(conn: &Connection) -> Result<Transaction> {
    Ok(conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .await?)
}

/// Commit `tx` if `outcome` succeeded, roll it back otherwise.
///
/// The original error is returned even when the rollback itself fails.
pub async fn finish<T>(tx: Transaction, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed after {e}");
            }
            Err(e)
        }
    }
}

