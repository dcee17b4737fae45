//! Forward-only schema migrations.
//!
//! The `schema_meta` table doubles as a small key-value store. Migrations
//! bump its `schema_version` key until it reaches
//! [`CURRENT_SCHEMA_VERSION`]; there is no downgrade path.

use rusqlite::{Connection, OptionalExtension};

/// The schema version the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Pending migrations keyed by the version they produce, in ascending order.
const MIGRATIONS: &[(u32, fn(&Connection) -> rusqlite::Result<()>)] =
    &[(2, stamp_embedding_model)];

fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Schema version stored in the database; 0 when the key is missing or
/// unparseable.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    Ok(read_meta(conn, "schema_version")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

/// The embedding model this store's vectors were written with, if stamped.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    read_meta(conn, "embedding_model")
}

pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    write_meta(conn, "embedding_model", model)
}

/// Apply every migration newer than the stored version.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;

    for (produces, migrate) in MIGRATIONS {
        if version >= *produces {
            continue;
        }
        tracing::info!(from = version, to = *produces, "running schema migration");
        migrate(conn)?;
        write_meta(conn, "schema_version", &produces.to_string())?;
        version = *produces;
    }

    if version < CURRENT_SCHEMA_VERSION {
        tracing::error!(
            version,
            expected = CURRENT_SCHEMA_VERSION,
            "no migration path to the expected schema version"
        );
    }
    Ok(())
}

/// v1 -> v2: stamp the embedding model name into `schema_meta`.
///
/// Vectors written by different models are not comparable; the stored name
/// lets startup flag a mismatch before mixed-model rows accumulate.
fn stamp_embedding_model(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) \
         VALUES ('embedding_model', 'bge-small-en-v1.5')",
        [],
    )?;
    Ok(())
}
