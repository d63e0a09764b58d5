//! SQLite engine: connection bootstrap, repository, schema synchronizer.

mod repository;
mod sync;

pub use repository::SqliteRepository;

pub(crate) use sync::{create_base_table, sync_entity};

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Open a SQLite pool from a `sqlite://` address; the path may be a file
/// or `:memory:`.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

    // One connection: the engine is serial, and it keeps `:memory:`
    // databases coherent across calls.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    Ok(pool)
}

/// SQLite identifier quoting; embedded quotes are doubled.
pub(crate) fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory() {
        let pool = connect("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("name"), "\"name\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
