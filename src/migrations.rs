//! User-supplied migrations: named one-shot operations recorded in a
//! bookkeeping table, filtered by engine, run in declared order.

use crate::error::{Result, SuperSaveError};
use crate::manager::{DatabasePool, Engine};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Name of the bookkeeping table.
pub const MIGRATIONS_TABLE: &str = "_supersave_migrations";

/// Context handed to a migration's run step.
pub struct MigrationContext<'a> {
    pub pool: &'a DatabasePool,
    pub engine: Engine,
}

/// A named one-shot operation.
///
/// A recorded name never runs again; a failed run propagates its error
/// and stays unrecorded, so the next startup retries it.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    fn name(&self) -> &str;

    /// Restrict the step to one engine; `None` runs everywhere.
    fn engine(&self) -> Option<Engine> {
        None
    }

    async fn run(&self, ctx: &MigrationContext<'_>) -> Result<()>;
}

/// Runs the configured migrations against the pool.
///
/// The bookkeeping table is created lazily on the first run. Duplicate
/// names are rejected before anything executes.
pub(crate) async fn run_migrations(
    pool: &DatabasePool,
    steps: &[Arc<dyn MigrationStep>],
) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.name().to_string()) {
            return Err(SuperSaveError::Configuration(format!(
                "duplicate migration name '{}'",
                step.name()
            )));
        }
    }

    ensure_ledger(pool).await?;
    let executed = executed_names(pool).await?;
    let engine = pool.engine();
    let ctx = MigrationContext { pool, engine };

    for step in steps {
        if step.engine().is_some_and(|wanted| wanted != engine) {
            continue;
        }
        if executed.contains(step.name()) {
            continue;
        }
        step.run(&ctx).await?;
        record(pool, step.name()).await?;
        info!(migration = step.name(), "executed migration");
    }
    Ok(())
}

async fn ensure_ledger(pool: &DatabasePool) -> Result<()> {
    match pool {
        #[cfg(feature = "sqlite")]
        DatabasePool::Sqlite(pool) => {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS \"_supersave_migrations\" (\"name\" TEXT PRIMARY KEY)",
            )
            .execute(pool)
            .await?;
        }
        #[cfg(feature = "mysql")]
        DatabasePool::Mysql(pool) => {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS `_supersave_migrations` \
                 (`name` VARCHAR(191) NOT NULL, PRIMARY KEY (`name`))",
            )
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

async fn executed_names(pool: &DatabasePool) -> Result<HashSet<String>> {
    use sqlx::Row;

    let mut names = HashSet::new();
    match pool {
        #[cfg(feature = "sqlite")]
        DatabasePool::Sqlite(pool) => {
            let rows = sqlx::query("SELECT \"name\" FROM \"_supersave_migrations\"")
                .fetch_all(pool)
                .await?;
            for row in rows {
                names.insert(row.try_get::<String, _>("name")?);
            }
        }
        #[cfg(feature = "mysql")]
        DatabasePool::Mysql(pool) => {
            let rows = sqlx::query("SELECT `name` FROM `_supersave_migrations`")
                .fetch_all(pool)
                .await?;
            for row in rows {
                names.insert(row.try_get::<String, _>("name")?);
            }
        }
    }
    Ok(names)
}

async fn record(pool: &DatabasePool, name: &str) -> Result<()> {
    match pool {
        #[cfg(feature = "sqlite")]
        DatabasePool::Sqlite(pool) => {
            sqlx::query("INSERT INTO \"_supersave_migrations\" (\"name\") VALUES (?)")
                .bind(name)
                .execute(pool)
                .await?;
        }
        #[cfg(feature = "mysql")]
        DatabasePool::Mysql(pool) => {
            sqlx::query("INSERT INTO `_supersave_migrations` (`name`) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}
