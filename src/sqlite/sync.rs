//! Reconciles a SQLite table's physical shape with its entity definition:
//! legacy TEXT contents upgrade, generated-column recreation, incremental
//! index maintenance.

use super::quote_identifier;
use crate::entity::EntityDefinition;
use crate::error::{Result, SuperSaveError};
use crate::schema::{
    expected_columns, index_base_column, GeneratedColumn, CONTENTS_COLUMN, ID_COLUMN,
};
use regex::Regex;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashSet;
use tracing::{debug, info};

/// Creates the bare `(id, contents)` table when it does not exist yet.
pub(crate) async fn create_base_table(pool: &SqlitePool, table: &str) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} JSON NOT NULL)",
        quote_identifier(table),
        quote_identifier(ID_COLUMN),
        quote_identifier(CONTENTS_COLUMN)
    );
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

/// Brings the entity's table to the target shape.
///
/// Field names are validated before any DDL is derived from them.
pub(crate) async fn sync_entity(pool: &SqlitePool, definition: &EntityDefinition) -> Result<()> {
    let table = definition.table_name();
    let columns = expected_columns(definition)?;

    migrate_legacy_contents(pool, &table, &columns).await?;
    reconcile(pool, &table, &columns).await
}

#[derive(Debug)]
struct TableColumn {
    name: String,
    column_type: String,
}

async fn table_info(pool: &SqlitePool, table: &str) -> Result<Vec<TableColumn>> {
    // table_xinfo lists generated columns on every SQLite build
    let sql = format!("PRAGMA table_xinfo({})", quote_identifier(table));
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok(TableColumn {
                name: row.try_get("name")?,
                column_type: row.try_get("type")?,
            })
        })
        .collect()
}

/// Upgrades a legacy table whose `contents` column is plain TEXT.
///
/// Runs at most once per table: the rebuilt table declares `contents`
/// as JSON, so later syncs skip it.
async fn migrate_legacy_contents(
    pool: &SqlitePool,
    table: &str,
    columns: &[GeneratedColumn],
) -> Result<()> {
    let info = table_info(pool, table).await?;
    let contents = info
        .iter()
        .find(|column| column.name == CONTENTS_COLUMN)
        .ok_or_else(|| {
            SuperSaveError::Schema(format!("table '{}' has no contents column", table))
        })?;

    match contents.column_type.to_ascii_uppercase().as_str() {
        "JSON" => Ok(()),
        "TEXT" => {
            debug!(table, "legacy TEXT contents column, rebuilding as JSON");
            rebuild_table(pool, table, columns).await?;
            info!(table, "migrated contents column to JSON");
            Ok(())
        }
        other => Err(SuperSaveError::Schema(format!(
            "unrecognised contents column type '{}' on table '{}'",
            other, table
        ))),
    }
}

/// Compares current columns and indexes against the target shape.
async fn reconcile(pool: &SqlitePool, table: &str, columns: &[GeneratedColumn]) -> Result<()> {
    let info = table_info(pool, table).await?;
    let existing: Vec<&TableColumn> = info
        .iter()
        .filter(|column| column.name != ID_COLUMN && column.name != CONTENTS_COLUMN)
        .collect();

    if columns_need_rebuild(pool, table, &existing, columns).await? {
        debug!(table, "column layout diverged, rebuilding table");
        rebuild_table(pool, table, columns).await?;
        info!(table, "rebuilt table to match entity definition");
        return Ok(());
    }

    sync_indexes(pool, table, columns).await
}

async fn columns_need_rebuild(
    pool: &SqlitePool,
    table: &str,
    existing: &[&TableColumn],
    columns: &[GeneratedColumn],
) -> Result<bool> {
    if existing.len() != columns.len() {
        return Ok(true);
    }
    for expected in columns {
        match existing.iter().find(|column| column.name == expected.name) {
            None => return Ok(true),
            Some(column)
                if !column
                    .column_type
                    .eq_ignore_ascii_case(expected.sqlite_type()) =>
            {
                return Ok(true)
            }
            Some(_) => {}
        }
    }

    // A matching column that is not generated is a legacy plain column.
    if !columns.is_empty() {
        let ddl = table_ddl(pool, table).await?;
        for expected in columns {
            if !is_generated_column(&ddl, &expected.name) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

async fn table_ddl(pool: &SqlitePool, table: &str) -> Result<String> {
    let row = sqlx::query("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(table)
        .fetch_optional(pool)
        .await?;
    row.and_then(|r| r.try_get::<Option<String>, _>("sql").ok().flatten())
        .ok_or_else(|| SuperSaveError::Schema(format!("no DDL found for table '{}'", table)))
}

fn is_generated_column(ddl: &str, field: &str) -> bool {
    let pattern = format!(
        r#"(?i)"?{}"?\s+[^,)]+GENERATED\s+ALWAYS\s+AS"#,
        regex::escape(field)
    );
    Regex::new(&pattern)
        .map(|re| re.is_match(ddl))
        .unwrap_or(false)
}

fn create_table_sql(table: &str, columns: &[GeneratedColumn]) -> String {
    let mut parts = vec![
        format!("{} TEXT PRIMARY KEY", quote_identifier(ID_COLUMN)),
        format!("{} JSON NOT NULL", quote_identifier(CONTENTS_COLUMN)),
    ];
    for column in columns {
        parts.push(format!(
            "{} {} GENERATED ALWAYS AS ({}) VIRTUAL",
            quote_identifier(&column.name),
            column.sqlite_type(),
            column.sqlite_expression()
        ));
    }
    format!("CREATE TABLE {} ({})", quote_identifier(table), parts.join(", "))
}

fn create_index_sql(table: &str, column: &GeneratedColumn) -> String {
    format!(
        "CREATE INDEX {} ON {} ({})",
        quote_identifier(&column.index_name()),
        quote_identifier(table),
        quote_identifier(&column.name)
    )
}

/// Rebuilds the table via a `<table>_2` shadow: copy `(id, contents)`
/// row-by-row, drop the source, rename. The whole triple runs inside a
/// transaction.
///
/// Generated columns are never copied; they recompute on insert. A row
/// whose contents fail to parse aborts the rebuild.
async fn rebuild_table(
    pool: &SqlitePool,
    table: &str,
    columns: &[GeneratedColumn],
) -> Result<()> {
    let shadow = format!("{}_2", table);
    let mut tx = pool.begin().await?;

    let drop_shadow = format!("DROP TABLE IF EXISTS {}", quote_identifier(&shadow));
    sqlx::query(&drop_shadow).execute(&mut *tx).await?;
    sqlx::query(&create_table_sql(&shadow, columns))
        .execute(&mut *tx)
        .await?;

    let select = format!(
        "SELECT {}, {} FROM {}",
        quote_identifier(ID_COLUMN),
        quote_identifier(CONTENTS_COLUMN),
        quote_identifier(table)
    );
    let insert = format!(
        "INSERT INTO {} ({}, {}) VALUES (?, ?)",
        quote_identifier(&shadow),
        quote_identifier(ID_COLUMN),
        quote_identifier(CONTENTS_COLUMN)
    );
    let rows = sqlx::query(&select).fetch_all(&mut *tx).await?;
    for row in rows {
        let id: String = row.try_get(ID_COLUMN)?;
        let contents: String = row.try_get(CONTENTS_COLUMN)?;
        serde_json::from_str::<serde_json::Value>(&contents).map_err(|err| {
            SuperSaveError::Schema(format!(
                "row '{}' in table '{}' holds invalid JSON: {}",
                id, table, err
            ))
        })?;
        sqlx::query(&insert)
            .bind(id)
            .bind(contents)
            .execute(&mut *tx)
            .await?;
    }

    let drop_source = format!("DROP TABLE {}", quote_identifier(table));
    sqlx::query(&drop_source).execute(&mut *tx).await?;
    // index names are database-global; the source's must be gone first
    for column in columns {
        sqlx::query(&create_index_sql(&shadow, column))
            .execute(&mut *tx)
            .await?;
    }
    let rename = format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_identifier(&shadow),
        quote_identifier(table)
    );
    sqlx::query(&rename).execute(&mut *tx).await?;

    tx.commit().await?;
    Ok(())
}

/// Adds missing `idx_<field>` indexes and drops the ones whose base
/// column left `filter_sort_fields`. No table rebuild.
async fn sync_indexes(pool: &SqlitePool, table: &str, columns: &[GeneratedColumn]) -> Result<()> {
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND name LIKE 'idx_%'",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    let existing: HashSet<String> = rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>("name").ok())
        .collect();

    let expected: HashSet<String> = columns.iter().map(GeneratedColumn::index_name).collect();

    for column in columns {
        if !existing.contains(&column.index_name()) {
            debug!(table, index = %column.index_name(), "creating index");
            sqlx::query(&create_index_sql(table, column))
                .execute(pool)
                .await?;
        }
    }

    let keep: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    for index in &existing {
        if expected.contains(index) {
            continue;
        }
        let Some(base) = index_base_column(index) else {
            continue;
        };
        if base == ID_COLUMN || base == CONTENTS_COLUMN || keep.contains(base) {
            continue;
        }
        debug!(table, index = %index, "dropping stale index");
        let sql = format!("DROP INDEX {}", quote_identifier(index));
        sqlx::query(&sql).execute(pool).await?;
    }

    Ok(())
}
