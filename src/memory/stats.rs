use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::Result;

/// Store-wide counters, optionally narrowed to one agent.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub agents: u64,
    pub total_facts: u64,
    pub by_fact_type: HashMap<String, u64>,
    pub links: u64,
    pub by_link_kind: HashMap<String, u64>,
    pub documents: u64,
    pub queued_operations: u64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_fact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_fact: Option<String>,
}

/// Compute store statistics.
///
/// If `agent` is provided, fact, link, document, and operation counts are
/// restricted to that agent. `db_path` is used for file size calculation;
/// pass None for in-memory databases.
pub fn store_stats(
    conn: &Connection,
    agent: Option<&str>,
    db_path: Option<&Path>,
) -> Result<StatsResponse> {
    let agents = count_scalar(conn, "SELECT COUNT(*) FROM agents", None)?;
    let total_facts = count_scalar(conn, "SELECT COUNT(*) FROM facts", agent)?;
    let by_fact_type = count_grouped(
        conn,
        "facts",
        "fact_type",
        &["world", "agent", "opinion"],
        agent,
    )?;
    let links = count_scalar(conn, "SELECT COUNT(*) FROM links", agent)?;
    let by_link_kind = count_grouped(
        conn,
        "links",
        "kind",
        &["temporal", "semantic", "entity"],
        agent,
    )?;
    let documents = count_scalar(conn, "SELECT COUNT(*) FROM documents", agent)?;
    let queued_operations = count_scalar(conn, "SELECT COUNT(*) FROM async_operations", agent)?;
    let (oldest_fact, newest_fact) = fact_time_range(conn, agent)?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        agents,
        total_facts,
        by_fact_type,
        links,
        by_link_kind,
        documents,
        queued_operations,
        db_size_bytes,
        oldest_fact,
        newest_fact,
    })
}

/// Run a COUNT query, appending the agent filter when present.
fn count_scalar(conn: &Connection, base_sql: &str, agent: Option<&str>) -> Result<u64> {
    let count: i64 = match agent {
        Some(a) => conn.query_row(
            &format!("{base_sql} WHERE agent_id = ?1"),
            params![a],
            |row| row.get(0),
        )?,
        None => conn.query_row(base_sql, [], |row| row.get(0))?,
    };
    Ok(count as u64)
}

/// Group counts over one column, pre-filling every known value with zero.
fn count_grouped(
    conn: &Connection,
    table: &str,
    column: &str,
    known: &[&str],
    agent: Option<&str>,
) -> Result<HashMap<String, u64>> {
    let mut map = HashMap::new();
    for value in known {
        map.insert((*value).to_string(), 0);
    }

    let (where_clause, param) = agent_filter(agent);
    let sql = format!("SELECT {column}, COUNT(*) FROM {table} {where_clause} GROUP BY {column}");
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<(String, i64)> = if let Some(ref a) = param {
        stmt.query_map(params![a], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    } else {
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    for (value, count) in rows {
        map.insert(value, count as u64);
    }
    Ok(map)
}

/// Oldest and newest fact timestamps.
fn fact_time_range(
    conn: &Connection,
    agent: Option<&str>,
) -> Result<(Option<String>, Option<String>)> {
    let (where_clause, param) = agent_filter(agent);
    let sql = format!("SELECT MIN(created_at), MAX(created_at) FROM facts {where_clause}");

    let range = if let Some(ref a) = param {
        conn.query_row(&sql, params![a], |row| Ok((row.get(0)?, row.get(1)?)))?
    } else {
        conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?
    };
    Ok(range)
}

/// Build a WHERE clause for optional agent filtering.
fn agent_filter(agent: Option<&str>) -> (String, Option<String>) {
    match agent {
        Some(a) => ("WHERE agent_id = ?1".to_string(), Some(a.to_string())),
        None => (String::new(), None),
    }
}
