use super::quote_identifier;
use crate::entity::EntityDefinition;
use crate::error::{Result, SuperSaveError};
use crate::query::{render_conditions, BindValue, Query, QueryBuilder};
use crate::repository::{
    self, fill_in_relations, hydrate, serialize_contents, EntityRepository, RepositoryRegistry,
};
use crate::schema::{CONTENTS_COLUMN, ID_COLUMN};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// SQLite-backed repository for a single entity table.
pub struct SqliteRepository {
    pool: SqlitePool,
    table: String,
    definition: EntityDefinition,
    registry: RepositoryRegistry,
}

impl SqliteRepository {
    pub fn new(
        pool: SqlitePool,
        definition: EntityDefinition,
        registry: RepositoryRegistry,
    ) -> Self {
        Self {
            pool,
            table: definition.table_name(),
            definition,
            registry,
        }
    }

    fn select_prefix(&self) -> String {
        format!(
            "SELECT {}, {} FROM {}",
            quote_identifier(ID_COLUMN),
            quote_identifier(CONTENTS_COLUMN),
            quote_identifier(&self.table)
        )
    }

    fn query_sql(&self, query: &Query, binds: &mut Vec<BindValue>) -> Result<String> {
        let mut sql = self.select_prefix();

        let where_sql =
            render_conditions(&self.definition, query.conditions(), quote_identifier, binds)?;
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        if !query.sort().is_empty() {
            let order = query
                .sort()
                .iter()
                .map(|s| {
                    format!(
                        "{} COLLATE NOCASE {}",
                        quote_identifier(&s.field),
                        s.direction
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }

        match (query.limit(), query.offset()) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            // OFFSET needs a LIMIT clause; -1 leaves it unbounded
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        Ok(sql)
    }

    async fn fetch(&self, sql: &str, binds: Vec<BindValue>) -> Result<Vec<Value>> {
        let mut sqlx_query = sqlx::query(sql);
        for bind in binds {
            sqlx_query = match bind {
                BindValue::Text(s) => sqlx_query.bind(s),
                BindValue::Int(i) => sqlx_query.bind(i),
                BindValue::Float(f) => sqlx_query.bind(f),
                BindValue::Null => sqlx_query.bind(Option::<String>::None),
            };
        }
        let rows = sqlx_query.fetch_all(&self.pool).await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get(ID_COLUMN)?;
            let contents: String = row.try_get(CONTENTS_COLUMN)?;
            let entity = hydrate(&self.definition, &id, Value::String(contents))?;
            entities.push(fill_in_relations(&self.registry, &self.definition, entity).await?);
        }
        Ok(entities)
    }
}

#[async_trait]
impl EntityRepository for SqliteRepository {
    fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    fn create_query(&self) -> QueryBuilder {
        QueryBuilder::for_entity(&self.definition)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Value>> {
        let sql = format!("{} WHERE {} = ?", self.select_prefix(), quote_identifier(ID_COLUMN));
        let mut entities = self
            .fetch(&sql, vec![BindValue::Text(id.to_string())])
            .await?;
        Ok(if entities.is_empty() {
            None
        } else {
            Some(entities.remove(0))
        })
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "{} WHERE {} IN ({})",
            self.select_prefix(),
            quote_identifier(ID_COLUMN),
            placeholders
        );
        let binds = ids.iter().map(|id| BindValue::Text(id.clone())).collect();
        self.fetch(&sql, binds).await
    }

    async fn get_all(&self) -> Result<Vec<Value>> {
        let sql = self.select_prefix();
        self.fetch(&sql, Vec::new()).await
    }

    async fn get_by_query(&self, query: &Query) -> Result<Vec<Value>> {
        let mut binds = Vec::new();
        let sql = self.query_sql(query, &mut binds)?;
        self.fetch(&sql, binds).await
    }

    async fn create(&self, entity: Value) -> Result<Value> {
        let id = repository::entity_id(&entity)
            .map(String::from)
            .unwrap_or_else(repository::generate_id);
        let contents = serialize_contents(&self.definition, entity)?;

        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?, ?)",
            quote_identifier(&self.table),
            quote_identifier(ID_COLUMN),
            quote_identifier(CONTENTS_COLUMN)
        );
        sqlx::query(&sql)
            .bind(&id)
            .bind(&contents)
            .execute(&self.pool)
            .await?;

        self.get_by_id(&id).await?.ok_or_else(|| {
            SuperSaveError::Data(format!("created row '{}' could not be read back", id))
        })
    }

    async fn update(&self, entity: Value) -> Result<Option<Value>> {
        let id = repository::entity_id(&entity)
            .map(String::from)
            .ok_or_else(|| SuperSaveError::Data("update requires an entity id".to_string()))?;
        let contents = serialize_contents(&self.definition, entity)?;

        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            quote_identifier(&self.table),
            quote_identifier(CONTENTS_COLUMN),
            quote_identifier(ID_COLUMN)
        );
        let result = sqlx::query(&sql)
            .bind(&contents)
            .bind(&id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_id(&id).await
    }

    async fn delete_using_id(&self, id: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_identifier(&self.table),
            quote_identifier(ID_COLUMN)
        );
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}
