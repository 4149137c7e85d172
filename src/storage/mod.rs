//! SQLite storage layer -- connection pool and migrations.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode};
use tracing::warn;

use crate::history::HistoryError;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
///
/// A file SQLite rejects as corrupt is moved aside and replaced with an empty
/// database; if it cannot be moved, the history lives in memory for this
/// process.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(dir) = Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        }
    }

    if let Err(e) = check_readable(path) {
        if !is_corrupt(&e) {
            return Err(e).with_context(|| format!("failed to open {}", path));
        }
        let err = HistoryError::Corrupt(format!("{}: {}", path, e));
        match move_aside(path) {
            Ok(moved) => warn!(error = %err, moved_to = %moved, "starting with an empty run history"),
            Err(move_err) => {
                warn!(error = %err, move_error = %move_err, "keeping run history in memory");
                return open_memory_pool();
            }
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

fn check_readable(path: &str) -> rusqlite::Result<()> {
    let conn = Connection::open(path)?;
    conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}

fn is_corrupt(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

/// Rename the database and its WAL sidecars to `<path>.corrupt-<timestamp>`.
fn move_aside(path: &str) -> std::io::Result<String> {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let target = format!("{}.corrupt-{}", path, stamp);
    std::fs::rename(path, &target)?;
    for suffix in ["-wal", "-shm"] {
        let sidecar = format!("{}{}", path, suffix);
        if Path::new(&sidecar).exists() {
            std::fs::rename(&sidecar, format!("{}{}", target, suffix))?;
        }
    }
    Ok(target)
}

/// In-memory database for tests and dry runs.
///
/// Every SQLite `:memory:` connection is its own database, so the pool is
/// capped at a single connection.
pub fn open_memory_pool() -> Result<Pool> {
    let pool = R2D2Pool::builder()
        .max_size(1)
        .build(SqliteConnectionManager::memory())?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}
