//! Embedded schema migrations.
//!
//! `migrations/sqlite/001_initial_schema.sql` creates the product catalogue,
//! the stock ledger and every document table (invoices, deliveries, credit
//! notes, swaps, payments). Later changes land as new numbered files; an
//! applied file is never edited.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Tables the engine cannot run without.
pub const LEDGER_TABLES: &[&str] = &["products", "stock_movements", "invoices", "invoice_line_items"];

/// Applies every migration not yet recorded in `_sqlx_migrations`.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;
    info!(embedded = MIGRATOR.migrations.len(), "Schema up to date");
    Ok(())
}

/// Embedded versus applied migration counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub embedded: usize,
    pub applied: usize,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.applied >= self.embedded
    }
}

/// Reports how far the schema has been migrated.
///
/// A database opened with `run_migrations(false)` that was never migrated
/// has no `_sqlx_migrations` table and reports zero applied.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<MigrationStatus> {
    let applied = match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
    {
        Ok(n) => n as usize,
        Err(e) => {
            warn!(error = %e, "No migration history found");
            0
        }
    };

    Ok(MigrationStatus {
        embedded: MIGRATOR.migrations.len(),
        applied,
    })
}

/// Names of [`LEDGER_TABLES`] absent from the schema.
pub async fn missing_ledger_tables(pool: &SqlitePool) -> DbResult<Vec<String>> {
    let present: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(pool)
            .await?;

    Ok(LEDGER_TABLES
        .iter()
        .filter(|t| !present.iter().any(|p| p == *t))
        .map(|t| t.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_fresh_database_is_current() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let status = migration_status(db.pool()).await.unwrap();
        assert!(status.is_current());
        assert!(status.embedded >= 1);
        assert!(missing_ledger_tables(db.pool()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmigrated_database_reports_pending() {
        let db = Database::new(DbConfig::in_memory().run_migrations(false))
            .await
            .unwrap();

        let status = migration_status(db.pool()).await.unwrap();
        assert_eq!(status.applied, 0);
        assert!(!status.is_current());
        assert_eq!(missing_ledger_tables(db.pool()).await.unwrap().len(), LEDGER_TABLES.len());

        db.run_migrations().await.unwrap();
        assert!(migration_status(db.pool()).await.unwrap().is_current());
    }
}
