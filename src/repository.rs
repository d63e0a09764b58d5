use crate::entity::EntityDefinition;
use crate::error::{Result, SuperSaveError};
use crate::query::{Query, QueryBuilder};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Capability surface every engine repository provides.
///
/// Entities are open JSON objects carrying a stable string `id`.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    fn definition(&self) -> &EntityDefinition;

    /// A query builder primed with this entity's filter/sort fields.
    fn create_query(&self) -> QueryBuilder;

    async fn get_by_id(&self, id: &str) -> Result<Option<Value>>;

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Value>>;

    async fn get_all(&self) -> Result<Vec<Value>>;

    async fn get_by_query(&self, query: &Query) -> Result<Vec<Value>>;

    /// Insert a new entity, assigning an id when absent, and return the
    /// rehydrated row.
    async fn create(&self, entity: Value) -> Result<Value>;

    /// Full replacement of the stored document; the id is immutable.
    /// Returns `None` when no row carries the entity's id.
    async fn update(&self, entity: Value) -> Result<Option<Value>>;

    /// Idempotent delete; an absent id is a no-op.
    async fn delete_using_id(&self, id: &str) -> Result<()>;
}

/// Shared lookup of repositories by full entity name, used for relation
/// expansion across collections.
pub type RepositoryRegistry = Arc<RwLock<HashMap<String, Arc<dyn EntityRepository>>>>;

pub(crate) fn new_registry() -> RepositoryRegistry {
    Arc::new(RwLock::new(HashMap::new()))
}

/// A fresh 32-character opaque entity id.
pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub(crate) fn entity_id(entity: &Value) -> Option<&str> {
    entity.get("id").and_then(Value::as_str)
}

fn as_object(entity: Value) -> Result<Map<String, Value>> {
    match entity {
        Value::Object(map) => Ok(map),
        other => Err(SuperSaveError::Data(format!(
            "entity must be a JSON object, got {}",
            other
        ))),
    }
}

fn reference_id(value: &Value) -> Result<String> {
    match value {
        Value::String(id) => Ok(id.clone()),
        Value::Object(map) => map
            .get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| SuperSaveError::Data("relation value is missing an id".to_string())),
        other => Err(SuperSaveError::Data(format!(
            "relation value must be an id or an object with an id, got {}",
            other
        ))),
    }
}

fn id_reference(id: String) -> Value {
    let mut map = Map::new();
    map.insert("id".to_string(), Value::String(id));
    Value::Object(map)
}

/// Relation projection on write: linked entities (or bare id strings)
/// collapse to `{id}` references before serialisation.
pub(crate) fn simplify_relations(
    definition: &EntityDefinition,
    entity: Value,
) -> Result<Map<String, Value>> {
    let mut document = as_object(entity)?;
    for relation in &definition.relations {
        let Some(value) = document.get(&relation.field) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let simplified = if relation.multiple {
            let items = value.as_array().cloned().ok_or_else(|| {
                SuperSaveError::Data(format!(
                    "relation field '{}' expects an array",
                    relation.field
                ))
            })?;
            let references = items
                .iter()
                .map(|item| reference_id(item).map(id_reference))
                .collect::<Result<Vec<Value>>>()?;
            Value::Array(references)
        } else {
            id_reference(reference_id(value)?)
        };
        document.insert(relation.field.clone(), simplified);
    }
    Ok(document)
}

/// Relation expansion on read: `{id}` references are re-fetched from the
/// target repository. Missing single references resolve to null; missing
/// members of a multiple relation are dropped, order preserved.
pub(crate) async fn fill_in_relations(
    registry: &RepositoryRegistry,
    definition: &EntityDefinition,
    mut entity: Value,
) -> Result<Value> {
    for relation in &definition.relations {
        let Some(value) = entity.get(&relation.field) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        let target = relation.target_name();
        let repository = registry.read().await.get(&target).cloned();
        let repository = repository.ok_or_else(|| {
            SuperSaveError::Configuration(format!(
                "relation '{}' points at unknown entity '{}'",
                relation.field, target
            ))
        })?;

        let expanded = if relation.multiple {
            let items = value.as_array().cloned().unwrap_or_default();
            let ids = items
                .iter()
                .map(reference_id)
                .collect::<Result<Vec<String>>>()?;
            let fetched = repository.get_by_ids(&ids).await?;
            let mut by_id: HashMap<String, Value> = fetched
                .into_iter()
                .filter_map(|e| entity_id(&e).map(|id| (id.to_string(), e.clone())))
                .collect();
            Value::Array(ids.iter().filter_map(|id| by_id.remove(id)).collect())
        } else {
            let id = reference_id(value)?;
            repository
                .get_by_id(&id)
                .await?
                .unwrap_or(Value::Null)
        };
        entity
            .as_object_mut()
            .expect("hydrated entity is an object")
            .insert(relation.field.clone(), expanded);
    }
    Ok(entity)
}

/// Merge the stored document over the entity template and restore the
/// authoritative id from its column.
///
/// `contents` arrives as a JSON string or as a driver-decoded object.
pub(crate) fn hydrate(
    definition: &EntityDefinition,
    id: &str,
    contents: Value,
) -> Result<Value> {
    let stored = match contents {
        Value::String(raw) => serde_json::from_str::<Value>(&raw)?,
        decoded @ Value::Object(_) => decoded,
        other => {
            return Err(SuperSaveError::Data(format!(
                "contents column holds neither JSON text nor an object: {}",
                other
            )))
        }
    };
    let stored = as_object(stored)?;

    let mut document = definition.template.clone();
    for (key, value) in stored {
        document.insert(key, value);
    }
    document.insert("id".to_string(), Value::String(id.to_string()));
    Ok(Value::Object(document))
}

/// Serialise an entity for storage: template underneath the simplified
/// document, `id` removed (its column is authoritative).
pub(crate) fn serialize_contents(
    definition: &EntityDefinition,
    entity: Value,
) -> Result<String> {
    let simplified = simplify_relations(definition, entity)?;
    let mut document = definition.template.clone();
    for (key, value) in simplified {
        document.insert(key, value);
    }
    document.remove("id");
    Ok(serde_json::to_string(&Value::Object(document))?)
}

impl std::fmt::Debug for dyn EntityRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRepository")
            .field("name", &self.definition().name)
            .finish()
    }
}
