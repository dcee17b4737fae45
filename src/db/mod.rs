pub mod migrations;
pub mod pool;
pub mod schema;

pub use pool::{Pool, PooledConnection};

use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

use crate::error::{MemoryError, Result};

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the mnema database at the given path, with all extensions
/// loaded, schema initialized, and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MemoryError::StoreUnavailable {
            detail: format!("failed to create directory {}: {e}", parent.display()),
        })?;
    }

    let conn = open_connection(path)?;

    schema::init_schema(&conn)?;
    migrations::run_migrations(&conn)?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a raw connection with pragmas applied, no schema work.
///
/// Used by the pool for connections past the first; the schema is already
/// in place by then.
pub fn open_connection(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    load_sqlite_vec();

    let conn = Connection::open(path).map_err(|e| MemoryError::StoreUnavailable {
        detail: format!("failed to open database at {}: {e}", path.display()),
    })?;

    // WAL for concurrent readers alongside the single writer
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // Wait out short write contention instead of failing with SQLITE_BUSY
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    Ok(conn)
}

/// Warn if the configured embedding model differs from the one recorded when
/// this store's vectors were written. Vectors from different models are not
/// comparable, so recall quality degrades silently on a mismatch.
pub fn check_embedding_model(conn: &Connection, configured: &str) -> Result<()> {
    match migrations::get_embedding_model(conn)? {
        Some(stored) if stored != configured => {
            tracing::warn!(
                stored = %stored,
                configured = %configured,
                "embedding model mismatch; existing vectors were written by a different model"
            );
        }
        Some(_) => {}
        None => {
            migrations::set_embedding_model(conn, configured)?;
        }
    }
    Ok(())
}

/// Open an in-memory database for testing.
#[cfg(test)]
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn)?;
    Ok(conn)
}
