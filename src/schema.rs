//! Engine-neutral description of the physical shape every entity table
//! converges to: an `id` primary key, a JSON `contents` document, and one
//! indexed generated column per declared filter/sort field.

use crate::entity::{EntityDefinition, FilterSortKind};
use crate::error::{Result, SuperSaveError};
use regex::Regex;
use std::sync::OnceLock;

pub const ID_COLUMN: &str = "id";
pub const CONTENTS_COLUMN: &str = "contents";

fn field_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("valid pattern"))
}

/// Validates a filter/sort field name before it is embedded in a JSON
/// path or column DDL.
pub fn validate_field_name(name: &str) -> Result<()> {
    if field_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(SuperSaveError::InvalidFieldName(name.to_string()))
    }
}

/// What a generated column is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    String,
    Number,
    Boolean,
    /// Single relation: the serialized reference.
    Relation,
    /// Multiple relation: comma-joined reference list.
    RelationList,
}

/// A column computed from `contents` by the database, indexed by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedColumn {
    pub name: String,
    pub source: ColumnSource,
}

impl GeneratedColumn {
    pub fn index_name(&self) -> String {
        format!("idx_{}", self.name)
    }

    pub fn sqlite_type(&self) -> &'static str {
        match self.source {
            ColumnSource::String | ColumnSource::Relation | ColumnSource::RelationList => "TEXT",
            ColumnSource::Number | ColumnSource::Boolean => "INTEGER",
        }
    }

    pub fn mysql_type(&self) -> &'static str {
        match self.source {
            ColumnSource::String | ColumnSource::Relation | ColumnSource::RelationList => {
                "VARCHAR(255)"
            }
            ColumnSource::Number => "INT(11)",
            ColumnSource::Boolean => "TINYINT(4)",
        }
    }

    /// MySQL DATA_TYPE for comparison against INFORMATION_SCHEMA (display
    /// widths are gone from COLUMN_TYPE on recent servers).
    pub fn mysql_data_type(&self) -> &'static str {
        match self.source {
            ColumnSource::String | ColumnSource::Relation | ColumnSource::RelationList => "varchar",
            ColumnSource::Number => "int",
            ColumnSource::Boolean => "tinyint",
        }
    }

    /// Whether the MySQL index on this column needs a 191-byte prefix.
    pub fn mysql_index_prefix(&self) -> bool {
        matches!(
            self.source,
            ColumnSource::String | ColumnSource::Relation | ColumnSource::RelationList
        )
    }

    pub fn sqlite_expression(&self) -> String {
        let extract = format!("json_extract(contents, '$.{}')", self.name);
        match self.source {
            ColumnSource::String | ColumnSource::Relation => extract,
            ColumnSource::Number | ColumnSource::Boolean => {
                format!("CAST({} AS INTEGER)", extract)
            }
            ColumnSource::RelationList => strip_array_text(&extract),
        }
    }

    pub fn mysql_expression(&self) -> String {
        let extract = format!("JSON_EXTRACT(contents, '$.{}')", self.name);
        let unquoted = format!("JSON_UNQUOTE({})", extract);
        match self.source {
            ColumnSource::Relation => unquoted,
            ColumnSource::RelationList => strip_array_text(&unquoted),
            ColumnSource::Number => format!("CAST({} AS SIGNED)", extract),
            ColumnSource::String => {
                format!("IF(JSON_TYPE({}) = 'NULL', NULL, {})", extract, unquoted)
            }
            ColumnSource::Boolean => format!(
                "CASE WHEN JSON_TYPE({extract}) = 'NULL' THEN NULL \
                 WHEN JSON_TYPE({extract}) = 'BOOLEAN' THEN {unquoted} = 'true' \
                 WHEN LOWER({unquoted}) = 'true' THEN 1 \
                 WHEN LOWER({unquoted}) = 'false' THEN 0 \
                 ELSE 0 END",
                extract = extract,
                unquoted = unquoted
            ),
        }
    }
}

/// Reduces extracted JSON array text to a comma-joined value list.
fn strip_array_text(extract: &str) -> String {
    format!(
        "REPLACE(REPLACE(REPLACE(REPLACE({}, '[', ''), ']', ''), '\"', ''), ' ', '')",
        extract
    )
}

/// The generated columns a definition calls for, in declaration order.
///
/// Validates every field name before any DDL is derived from it. A field
/// named after a declared relation takes the relation's shape instead of
/// its declared kind.
pub fn expected_columns(definition: &EntityDefinition) -> Result<Vec<GeneratedColumn>> {
    let mut columns = Vec::new();
    for (field, kind) in &definition.filter_sort_fields {
        if field == ID_COLUMN {
            continue;
        }
        validate_field_name(field)?;
        let source = match definition.relation(field) {
            Some(relation) if relation.multiple => ColumnSource::RelationList,
            Some(_) => ColumnSource::Relation,
            None => match kind {
                FilterSortKind::String => ColumnSource::String,
                FilterSortKind::Number => ColumnSource::Number,
                FilterSortKind::Boolean => ColumnSource::Boolean,
            },
        };
        columns.push(GeneratedColumn {
            name: field.clone(),
            source,
        });
    }
    Ok(columns)
}

/// Base column of an `idx_`-prefixed index name.
pub fn index_base_column(index_name: &str) -> Option<&str> {
    index_name.strip_prefix("idx_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Relation;

    fn def() -> EntityDefinition {
        EntityDefinition::new("moons")
            .with_relation(Relation::new("planet", "planets"))
            .with_relation(Relation::new("visitors", "astronauts").multiple())
            .with_filter_sort_field("name", FilterSortKind::String)
            .with_filter_sort_field("radius", FilterSortKind::Number)
            .with_filter_sort_field("visible", FilterSortKind::Boolean)
            .with_filter_sort_field("planet", FilterSortKind::String)
            .with_filter_sort_field("visitors", FilterSortKind::String)
    }

    #[test]
    fn test_validate_field_name() {
        assert!(validate_field_name("name").is_ok());
        assert!(validate_field_name("_private2").is_ok());
        assert!(validate_field_name("invalid-field-name").is_err());
        assert!(validate_field_name("1starts_with_digit").is_err());
        assert!(validate_field_name("a'); DROP TABLE x; --").is_err());
        assert!(validate_field_name("").is_err());
    }

    #[test]
    fn test_expected_columns_sources() {
        let columns = expected_columns(&def()).unwrap();
        let by_name = |n: &str| columns.iter().find(|c| c.name == n).unwrap();

        assert_eq!(by_name("name").source, ColumnSource::String);
        assert_eq!(by_name("radius").source, ColumnSource::Number);
        assert_eq!(by_name("visible").source, ColumnSource::Boolean);
        assert_eq!(by_name("planet").source, ColumnSource::Relation);
        assert_eq!(by_name("visitors").source, ColumnSource::RelationList);
    }

    #[test]
    fn test_id_never_gets_a_column() {
        let definition =
            EntityDefinition::new("planets").with_filter_sort_field("id", FilterSortKind::String);
        assert!(expected_columns(&definition).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_field_fails_before_ddl() {
        let definition = EntityDefinition::new("planets")
            .with_filter_sort_field("invalid-field-name", FilterSortKind::String);
        let err = expected_columns(&definition).unwrap_err();
        assert!(matches!(err, SuperSaveError::InvalidFieldName(_)));
    }

    #[test]
    fn test_sqlite_expressions() {
        let columns = expected_columns(&def()).unwrap();
        let by_name = |n: &str| columns.iter().find(|c| c.name == n).unwrap();

        assert_eq!(
            by_name("name").sqlite_expression(),
            "json_extract(contents, '$.name')"
        );
        assert_eq!(
            by_name("radius").sqlite_expression(),
            "CAST(json_extract(contents, '$.radius') AS INTEGER)"
        );
        assert_eq!(
            by_name("visible").sqlite_expression(),
            "CAST(json_extract(contents, '$.visible') AS INTEGER)"
        );
        assert_eq!(
            by_name("planet").sqlite_expression(),
            "json_extract(contents, '$.planet')"
        );
        assert!(by_name("visitors")
            .sqlite_expression()
            .starts_with("REPLACE(REPLACE(REPLACE(REPLACE("));
    }

    #[test]
    fn test_mysql_expressions() {
        let columns = expected_columns(&def()).unwrap();
        let by_name = |n: &str| columns.iter().find(|c| c.name == n).unwrap();

        assert_eq!(
            by_name("planet").mysql_expression(),
            "JSON_UNQUOTE(JSON_EXTRACT(contents, '$.planet'))"
        );
        assert_eq!(
            by_name("radius").mysql_expression(),
            "CAST(JSON_EXTRACT(contents, '$.radius') AS SIGNED)"
        );
        assert_eq!(
            by_name("name").mysql_expression(),
            "IF(JSON_TYPE(JSON_EXTRACT(contents, '$.name')) = 'NULL', NULL, \
             JSON_UNQUOTE(JSON_EXTRACT(contents, '$.name')))"
        );
        let visible = by_name("visible").mysql_expression();
        assert!(visible.starts_with("CASE WHEN"));
        assert!(visible.contains("= 'BOOLEAN'"));
        assert!(visible.ends_with("ELSE 0 END"));
    }

    #[test]
    fn test_column_types() {
        let columns = expected_columns(&def()).unwrap();
        let by_name = |n: &str| columns.iter().find(|c| c.name == n).unwrap();

        assert_eq!(by_name("name").sqlite_type(), "TEXT");
        assert_eq!(by_name("radius").sqlite_type(), "INTEGER");
        assert_eq!(by_name("name").mysql_type(), "VARCHAR(255)");
        assert_eq!(by_name("radius").mysql_type(), "INT(11)");
        assert_eq!(by_name("visible").mysql_type(), "TINYINT(4)");
        assert!(by_name("name").mysql_index_prefix());
        assert!(!by_name("radius").mysql_index_prefix());
    }

    #[test]
    fn test_index_names() {
        let column = GeneratedColumn {
            name: "distance".to_string(),
            source: ColumnSource::Number,
        };
        assert_eq!(column.index_name(), "idx_distance");
        assert_eq!(index_base_column("idx_distance"), Some("distance"));
        assert_eq!(index_base_column("sqlite_autoindex_1"), None);
    }
}
