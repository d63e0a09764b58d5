//! Reconciles a MySQL/MariaDB table's physical shape with its entity
//! definition. Mirrors the SQLite synchronizer with INFORMATION_SCHEMA
//! introspection; MySQL DDL auto-commits, so the rebuild is sequential
//! best-effort.

use super::quote_identifier;
use crate::entity::EntityDefinition;
use crate::error::{Result, SuperSaveError};
use crate::schema::{
    expected_columns, index_base_column, GeneratedColumn, CONTENTS_COLUMN, ID_COLUMN,
};
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Creates the bare `(id, contents)` table when it does not exist yet.
pub(crate) async fn create_base_table(pool: &MySqlPool, table: &str) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({} VARCHAR(32) NOT NULL, {} JSON NOT NULL, PRIMARY KEY ({}))",
        quote_identifier(table),
        quote_identifier(ID_COLUMN),
        quote_identifier(CONTENTS_COLUMN),
        quote_identifier(ID_COLUMN)
    );
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

/// Brings the entity's table to the target shape.
pub(crate) async fn sync_entity(pool: &MySqlPool, definition: &EntityDefinition) -> Result<()> {
    let table = definition.table_name();
    let columns = expected_columns(definition)?;

    migrate_legacy_contents(pool, &table, &columns).await?;
    reconcile(pool, &table, &columns).await
}

#[derive(Debug)]
struct TableColumn {
    name: String,
    data_type: String,
    column_type: String,
    generation_expression: Option<String>,
}

impl TableColumn {
    fn is_generated(&self) -> bool {
        self.generation_expression
            .as_deref()
            .is_some_and(|expr| !expr.is_empty())
    }
}

async fn table_info(pool: &MySqlPool, table: &str) -> Result<Vec<TableColumn>> {
    let rows = sqlx::query(
        "SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, GENERATION_EXPRESSION \
         FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
         ORDER BY ORDINAL_POSITION",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(TableColumn {
                name: row.try_get("COLUMN_NAME")?,
                data_type: row.try_get("DATA_TYPE")?,
                column_type: row.try_get("COLUMN_TYPE")?,
                generation_expression: row.try_get("GENERATION_EXPRESSION").ok(),
            })
        })
        .collect()
}

/// Whether a `longtext` contents column carries MariaDB's implicit
/// `JSON_VALID` check (which is what its JSON type compiles to).
///
/// When the probe itself fails (older servers have no CHECK_CONSTRAINTS
/// view), the column is assumed not to be JSON.
async fn has_json_valid_constraint(pool: &MySqlPool, table: &str) -> bool {
    let probe = sqlx::query(
        "SELECT COUNT(*) AS n \
         FROM INFORMATION_SCHEMA.CHECK_CONSTRAINTS cc \
         JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
           ON cc.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA \
          AND cc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
         WHERE tc.TABLE_SCHEMA = DATABASE() AND tc.TABLE_NAME = ? \
           AND cc.CHECK_CLAUSE LIKE '%json_valid%contents%'",
    )
    .bind(table)
    .fetch_one(pool)
    .await;
    match probe.and_then(|row| row.try_get::<i64, _>("n")) {
        Ok(n) => n > 0,
        Err(err) => {
            warn!(table, %err, "CHECK_CONSTRAINTS probe failed, assuming legacy contents");
            false
        }
    }
}

/// Upgrades a legacy table whose `contents` column is TEXT/LONGTEXT
/// without JSON validation.
async fn migrate_legacy_contents(
    pool: &MySqlPool,
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

    if contents.column_type.to_ascii_lowercase().contains("json") {
        return Ok(());
    }
    let legacy = match contents.data_type.to_ascii_lowercase().as_str() {
        "longtext" => !has_json_valid_constraint(pool, table).await,
        "text" => true,
        other => {
            return Err(SuperSaveError::Schema(format!(
                "unrecognised contents column type '{}' on table '{}'",
                other, table
            )))
        }
    };
    if !legacy {
        return Ok(());
    }

    debug!(table, "legacy text contents column, rebuilding as JSON");
    rebuild_table(pool, table, columns).await?;
    info!(table, "migrated contents column to JSON");
    Ok(())
}

/// Compares current columns and indexes against the target shape.
async fn reconcile(pool: &MySqlPool, table: &str, columns: &[GeneratedColumn]) -> Result<()> {
    let info = table_info(pool, table).await?;
    let existing: Vec<&TableColumn> = info
        .iter()
        .filter(|column| column.name != ID_COLUMN && column.name != CONTENTS_COLUMN)
        .collect();

    if columns_need_rebuild(&existing, columns) {
        debug!(table, "column layout diverged, rebuilding table");
        rebuild_table(pool, table, columns).await?;
        info!(table, "rebuilt table to match entity definition");
        return Ok(());
    }

    sync_indexes(pool, table, columns).await
}

fn columns_need_rebuild(existing: &[&TableColumn], columns: &[GeneratedColumn]) -> bool {
    if existing.len() != columns.len() {
        return true;
    }
    for expected in columns {
        match existing.iter().find(|column| column.name == expected.name) {
            None => return true,
            Some(column) => {
                if !column
                    .data_type
                    .eq_ignore_ascii_case(expected.mysql_data_type())
                {
                    return true;
                }
                // a matching plain column is a legacy leftover
                if !column.is_generated() {
                    return true;
                }
            }
        }
    }
    false
}

fn column_ddl(column: &GeneratedColumn) -> String {
    format!(
        "{} {} GENERATED ALWAYS AS ({}) STORED",
        quote_identifier(&column.name),
        column.mysql_type(),
        column.mysql_expression()
    )
}

fn index_ddl(column: &GeneratedColumn) -> String {
    let target = if column.mysql_index_prefix() {
        format!("{}(191)", quote_identifier(&column.name))
    } else {
        quote_identifier(&column.name)
    };
    format!("INDEX {} ({})", quote_identifier(&column.index_name()), target)
}

fn create_table_sql(table: &str, columns: &[GeneratedColumn]) -> String {
    let mut parts = vec![
        format!("{} VARCHAR(32) NOT NULL", quote_identifier(ID_COLUMN)),
        format!("{} JSON NOT NULL", quote_identifier(CONTENTS_COLUMN)),
    ];
    for column in columns {
        parts.push(column_ddl(column));
    }
    parts.push(format!("PRIMARY KEY ({})", quote_identifier(ID_COLUMN)));
    // index names are table-scoped, so the shadow can carry them up front
    for column in columns {
        parts.push(index_ddl(column));
    }
    format!("CREATE TABLE {} ({})", quote_identifier(table), parts.join(", "))
}

/// Rebuilds the table via a `<table>_2` shadow: copy `(id, contents)`
/// row-by-row, drop the source, rename.
///
/// Generated columns are never copied; they recompute on insert. A row
/// whose contents fail to parse aborts the rebuild before the source is
/// touched.
async fn rebuild_table(
    pool: &MySqlPool,
    table: &str,
    columns: &[GeneratedColumn],
) -> Result<()> {
    let shadow = format!("{}_2", table);

    let drop_shadow = format!("DROP TABLE IF EXISTS {}", quote_identifier(&shadow));
    sqlx::query(&drop_shadow).execute(pool).await?;
    sqlx::query(&create_table_sql(&shadow, columns))
        .execute(pool)
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
    let rows = sqlx::query(&select).fetch_all(pool).await?;
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
            .execute(pool)
            .await?;
    }

    let drop_source = format!("DROP TABLE {}", quote_identifier(table));
    sqlx::query(&drop_source).execute(pool).await?;
    let rename = format!(
        "RENAME TABLE {} TO {}",
        quote_identifier(&shadow),
        quote_identifier(table)
    );
    sqlx::query(&rename).execute(pool).await?;
    Ok(())
}

/// Adds missing `idx_<field>` indexes and drops the ones whose base
/// column left `filter_sort_fields`. No table rebuild.
async fn sync_indexes(pool: &MySqlPool, table: &str, columns: &[GeneratedColumn]) -> Result<()> {
    let rows = sqlx::query(
        "SELECT DISTINCT INDEX_NAME FROM INFORMATION_SCHEMA.STATISTICS \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND INDEX_NAME LIKE 'idx_%'",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    let existing: HashSet<String> = rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>("INDEX_NAME").ok())
        .collect();

    let expected: HashSet<String> = columns.iter().map(GeneratedColumn::index_name).collect();

    for column in columns {
        if !existing.contains(&column.index_name()) {
            debug!(table, index = %column.index_name(), "creating index");
            let sql = format!(
                "ALTER TABLE {} ADD {}",
                quote_identifier(table),
                index_ddl(column)
            );
            sqlx::query(&sql).execute(pool).await?;
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
        let sql = format!(
            "ALTER TABLE {} DROP INDEX {}",
            quote_identifier(table),
            quote_identifier(index)
        );
        sqlx::query(&sql).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSource;

    fn column(name: &str, source: ColumnSource) -> GeneratedColumn {
        GeneratedColumn {
            name: name.to_string(),
            source,
        }
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(
            "planets",
            &[column("name", ColumnSource::String), column("distance", ColumnSource::Number)],
        );
        assert!(sql.starts_with(
            "CREATE TABLE `planets` (`id` VARCHAR(32) NOT NULL, `contents` JSON NOT NULL, "
        ));
        assert!(sql.contains("`name` VARCHAR(255) GENERATED ALWAYS AS ("));
        assert!(sql.contains("`distance` INT(11) GENERATED ALWAYS AS (CAST(JSON_EXTRACT(contents, '$.distance') AS SIGNED)) STORED"));
        assert!(sql.contains("PRIMARY KEY (`id`)"));
        assert!(sql.contains("INDEX `idx_name` (`name`(191))"));
        assert!(sql.contains("INDEX `idx_distance` (`distance`)"));
    }

    #[test]
    fn test_index_prefix_only_for_strings() {
        assert_eq!(
            index_ddl(&column("name", ColumnSource::String)),
            "INDEX `idx_name` (`name`(191))"
        );
        assert_eq!(
            index_ddl(&column("visible", ColumnSource::Boolean)),
            "INDEX `idx_visible` (`visible`)"
        );
    }

    #[test]
    fn test_columns_need_rebuild() {
        let expected = [column("name", ColumnSource::String)];

        let aligned = TableColumn {
            name: "name".to_string(),
            data_type: "varchar".to_string(),
            column_type: "varchar(255)".to_string(),
            generation_expression: Some("json_unquote(...)".to_string()),
        };
        assert!(!columns_need_rebuild(&[&aligned], &expected));

        let plain = TableColumn {
            generation_expression: Some(String::new()),
            ..aligned_clone(&aligned)
        };
        assert!(columns_need_rebuild(&[&plain], &expected));

        let wrong_type = TableColumn {
            data_type: "int".to_string(),
            ..aligned_clone(&aligned)
        };
        assert!(columns_need_rebuild(&[&wrong_type], &expected));

        assert!(columns_need_rebuild(&[], &expected));
    }

    fn aligned_clone(column: &TableColumn) -> TableColumn {
        TableColumn {
            name: column.name.clone(),
            data_type: column.data_type.clone(),
            column_type: column.column_type.clone(),
            generation_expression: column.generation_expression.clone(),
        }
    }
}
