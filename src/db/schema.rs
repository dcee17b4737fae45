//! SQL DDL for all mnema tables.
//!
//! Defines the `agents`, `documents`, `facts`, `facts_vec` (vec0), `links`,
//! `async_operations`, and `schema_meta` tables. All DDL uses `IF NOT EXISTS`
//! for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for mnema's core tables.
const SCHEMA_SQL: &str = r#"
-- Agent profiles (Big Five traits plus opinion bias)
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    openness REAL NOT NULL DEFAULT 0.5 CHECK(openness >= 0.0 AND openness <= 1.0),
    conscientiousness REAL NOT NULL DEFAULT 0.5 CHECK(conscientiousness >= 0.0 AND conscientiousness <= 1.0),
    extraversion REAL NOT NULL DEFAULT 0.5 CHECK(extraversion >= 0.0 AND extraversion <= 1.0),
    agreeableness REAL NOT NULL DEFAULT 0.5 CHECK(agreeableness >= 0.0 AND agreeableness <= 1.0),
    neuroticism REAL NOT NULL DEFAULT 0.5 CHECK(neuroticism >= 0.0 AND neuroticism <= 1.0),
    bias_strength REAL NOT NULL DEFAULT 0.5 CHECK(bias_strength >= 0.0 AND bias_strength <= 1.0),
    background TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Source documents, keyed per agent by a caller-supplied id
CREATE TABLE IF NOT EXISTS documents (
    agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    id TEXT NOT NULL,
    original_text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    fact_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (agent_id, id)
);

-- Extracted facts
CREATE TABLE IF NOT EXISTS facts (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    document_id TEXT,
    fact_type TEXT NOT NULL CHECK(fact_type IN ('world','agent','opinion')),
    text TEXT NOT NULL,
    context TEXT,
    event_date TEXT,
    entities TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_facts_agent ON facts(agent_id);
CREATE INDEX IF NOT EXISTS idx_facts_agent_type ON facts(agent_id, fact_type);
CREATE INDEX IF NOT EXISTS idx_facts_document ON facts(agent_id, document_id);
CREATE INDEX IF NOT EXISTS idx_facts_event_date ON facts(agent_id, event_date);

-- Typed, weighted graph edges between facts of the same agent.
-- Endpoints are stored canonically ordered (src_id < dst_id); traversal
-- treats every link as undirected.
CREATE TABLE IF NOT EXISTS links (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    src_id TEXT NOT NULL REFERENCES facts(id) ON DELETE CASCADE,
    dst_id TEXT NOT NULL REFERENCES facts(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK(kind IN ('temporal','semantic','entity')),
    weight REAL NOT NULL CHECK(weight > 0.0 AND weight <= 1.0),
    created_at TEXT NOT NULL,
    UNIQUE(src_id, dst_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_links_src ON links(src_id);
CREATE INDEX IF NOT EXISTS idx_links_dst ON links(dst_id);
CREATE INDEX IF NOT EXISTS idx_links_agent ON links(agent_id);

-- Write-once ledger of queued background work
CREATE TABLE IF NOT EXISTS async_operations (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    task_type TEXT NOT NULL,
    items_count INTEGER NOT NULL,
    document_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_async_operations_agent ON async_operations(agent_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
/// One row per fact; rows are deleted explicitly alongside their fact.
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS facts_vec USING vec0(
    fact_id TEXT PRIMARY KEY,
    embedding FLOAT[384]
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(VEC_TABLE_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"agents".to_string()));
        assert!(tables.contains(&"documents".to_string()));
        assert!(tables.contains(&"facts".to_string()));
        assert!(tables.contains(&"links".to_string()));
        assert!(tables.contains(&"async_operations".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));

        // Verify the vec0 virtual table is live
        let version: String = conn
            .query_row("SELECT vec_version()", [], |r| r.get(0))
            .unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn link_weight_bounds_enforced() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO agents (id, created_at, updated_at) VALUES ('a', ?1, ?1)",
            [&now],
        )
        .unwrap();
        for id in ["f1", "f2"] {
            conn.execute(
                "INSERT INTO facts (id, agent_id, fact_type, text, created_at, updated_at) \
                 VALUES (?1, 'a', 'world', 'x', ?2, ?2)",
                rusqlite::params![id, now],
            )
            .unwrap();
        }

        // weight 0.0 violates the open lower bound
        let result = conn.execute(
            "INSERT INTO links (id, agent_id, src_id, dst_id, kind, weight, created_at) \
             VALUES ('l1', 'a', 'f1', 'f2', 'semantic', 0.0, ?1)",
            [&now],
        );
        assert!(result.is_err());

        // weight 1.0 is allowed
        conn.execute(
            "INSERT INTO links (id, agent_id, src_id, dst_id, kind, weight, created_at) \
             VALUES ('l2', 'a', 'f1', 'f2', 'semantic', 1.0, ?1)",
            [&now],
        )
        .unwrap();
    }

    #[test]
    fn duplicate_link_kind_rejected() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO agents (id, created_at, updated_at) VALUES ('a', ?1, ?1)",
            [&now],
        )
        .unwrap();
        for id in ["f1", "f2"] {
            conn.execute(
                "INSERT INTO facts (id, agent_id, fact_type, text, created_at, updated_at) \
                 VALUES (?1, 'a', 'world', 'x', ?2, ?2)",
                rusqlite::params![id, now],
            )
            .unwrap();
        }

        conn.execute(
            "INSERT INTO links (id, agent_id, src_id, dst_id, kind, weight, created_at) \
             VALUES ('l1', 'a', 'f1', 'f2', 'temporal', 0.8, ?1)",
            [&now],
        )
        .unwrap();
        // Same pair, same kind: rejected
        let dup = conn.execute(
            "INSERT INTO links (id, agent_id, src_id, dst_id, kind, weight, created_at) \
             VALUES ('l2', 'a', 'f1', 'f2', 'temporal', 0.5, ?1)",
            [&now],
        );
        assert!(dup.is_err());
        // Same pair, different kind: fine
        conn.execute(
            "INSERT INTO links (id, agent_id, src_id, dst_id, kind, weight, created_at) \
             VALUES ('l3', 'a', 'f1', 'f2', 'entity', 0.5, ?1)",
            [&now],
        )
        .unwrap();
    }
}
