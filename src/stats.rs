//! Store statistics and reset.
//!
//! Provides a quick summary of what's indexed: file and fragment counts,
//! embedding coverage, and per-source conversation breakdowns. Used by
//! `ctxc stats` to give confidence that syncs are working as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::models::StoreStats;
use crate::store::Store;

/// Collect aggregate counts from the store.
pub async fn gather_stats(store: &Store) -> Result<StoreStats> {
    let pool = store.pool();

    let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(pool)
        .await?;
    let fragments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments")
        .fetch_one(pool)
        .await?;
    let embedded_fragments: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM fragments WHERE embedding IS NOT NULL")
            .fetch_one(pool)
            .await?;
    let conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
        .fetch_one(pool)
        .await?;
    let exchanges: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exchanges")
        .fetch_one(pool)
        .await?;

    let source_rows = sqlx::query(
        "SELECT source, COUNT(*) AS conversation_count FROM conversations \
         GROUP BY source ORDER BY conversation_count DESC",
    )
    .fetch_all(pool)
    .await?;

    let by_source = source_rows
        .iter()
        .map(|row| (row.get("source"), row.get("conversation_count")))
        .collect();

    Ok(StoreStats {
        files,
        fragments,
        embedded_fragments,
        conversations,
        exchanges,
        by_source,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::open_existing(config).await?;
    let store = Store::new(pool.clone());

    let stats = gather_stats(&store).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Context Cache — Store Stats");
    println!("===========================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    println!();
    println!("  Files:          {}", stats.files);
    println!(
        "  Fragments:      {} ({} embedded, {}%)",
        stats.fragments,
        stats.embedded_fragments,
        if stats.fragments > 0 {
            (stats.embedded_fragments * 100) / stats.fragments
        } else {
            0
        }
    );
    println!("  Conversations:  {}", stats.conversations);
    println!("  Exchanges:      {}", stats.exchanges);

    if !stats.by_source.is_empty() {
        println!();
        println!("  By source:");
        for (source, count) in &stats.by_source {
            println!("    {:<12} {}", source, count);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Run the reset command: wipe every content table and reclaim space.
pub async fn run_reset(config: &Config) -> Result<()> {
    let pool = db::open_existing(config).await?;
    let store = Store::new(pool.clone());

    store.reset().await?;
    println!("Store reset: all files, fragments, conversations, and exchanges removed.");

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
