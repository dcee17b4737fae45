use anyhow::Result;

use crate::config::MnemaConfig;

/// Display store statistics in the terminal.
pub fn stats(config: &MnemaConfig, agent: Option<&str>) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = crate::db::open_database(&db_path)?;

    let response = crate::memory::stats::store_stats(&conn, agent, Some(&db_path))?;

    println!("Store Statistics");
    println!("{}", "=".repeat(40));
    println!("  Agents:              {}", response.agents);
    println!("  Facts:               {}", response.total_facts);
    println!("  Links:               {}", response.links);
    println!("  Documents:           {}", response.documents);
    println!("  Queued operations:   {}", response.queued_operations);
    println!();

    println!("Facts by type:");
    for t in &["world", "agent", "opinion"] {
        let count = response.by_fact_type.get(*t).copied().unwrap_or(0);
        println!("  {:<12} {}", t, count);
    }
    println!();

    println!("Links by kind:");
    for k in &["temporal", "semantic", "entity"] {
        let count = response.by_link_kind.get(*k).copied().unwrap_or(0);
        println!("  {:<12} {}", k, count);
    }
    println!();

    println!("Database size:         {} bytes", response.db_size_bytes);

    if let Some(ref oldest) = response.oldest_fact {
        println!("Oldest fact:           {oldest}");
    }
    if let Some(ref newest) = response.newest_fact {
        println!("Newest fact:           {newest}");
    }

    Ok(())
}
