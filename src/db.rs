//! SQLite pool construction and schema migration.

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;

/// Schema for the snapshot tier and rate-limit counters, embedded so tests
/// and the binary run the same statements.
const MIGRATION_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open a pooled SQLite connection for the given URL.
pub async fn connect(database_url: &str) -> Result<Arc<SqlitePool>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(Arc::new(pool))
}

/// Run the embedded migration statements one by one.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = split_statements(MIGRATION_SQL);

    tracing::debug!("running {} migration statements", statements.len());
    for statement in statements {
        sqlx::query(&statement).execute(db).await?;
    }
    Ok(())
}

/// Split a migration file into executable statements.
///
/// `--` comment lines are dropped before splitting so a semicolon inside a
/// comment cannot cut a statement in half.
fn split_statements(sql: &str) -> Vec<String> {
    sql.lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_lines_cannot_split_statements() {
        let sql = "-- a note; with a semicolon\nCREATE TABLE t (id INTEGER);\n-- trailing note\n";
        let statements = split_statements(sql);
        assert_eq!(statements, vec!["CREATE TABLE t (id INTEGER)".to_string()]);
    }

    #[tokio::test]
    async fn embedded_migration_runs_and_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM r2_files")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
