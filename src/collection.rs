//! Contract consumed by an external HTTP router: collections, the hook
//! taxonomy, and route path generation. Request framing, verb dispatch
//! and response shaping stay with the router.

use crate::entity::EntityDefinition;
use crate::error::HookError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub type HookResult<T> = std::result::Result<T, HookError>;

/// Request context shared by every hook: route params, query string,
/// headers, and the parsed body when one exists.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// The six collection hooks, each defaulting to a pass-through.
///
/// Hooks run in declared order; the runner threads each value through.
/// A [`HookError`] stops the chain and surfaces its HTTP status at the
/// boundary.
#[async_trait]
pub trait CollectionHooks: Send + Sync {
    /// After a list query, before the response is shaped.
    async fn get(&self, ctx: &HookContext, entities: Vec<Value>) -> HookResult<Vec<Value>> {
        let _ = ctx;
        Ok(entities)
    }

    /// After a single-row fetch.
    async fn get_by_id(&self, ctx: &HookContext, entity: Option<Value>) -> HookResult<Option<Value>> {
        let _ = ctx;
        Ok(entity)
    }

    /// Before a create; receives and returns the request body.
    async fn create_before(&self, ctx: &HookContext, body: Value) -> HookResult<Value> {
        let _ = ctx;
        Ok(body)
    }

    /// Before an update; receives the stored entity and the merged patch.
    async fn update_before(
        &self,
        ctx: &HookContext,
        existing: &Value,
        patch: Value,
    ) -> HookResult<Value> {
        let _ = (ctx, existing);
        Ok(patch)
    }

    /// Before a delete; receives the stored entity when it exists.
    async fn delete_before(&self, ctx: &HookContext, entity: Option<&Value>) -> HookResult<()> {
        let _ = (ctx, entity);
        Ok(())
    }

    /// Applied to every entity leaving the store over HTTP.
    async fn entity_transform(&self, ctx: &HookContext, entity: Value) -> HookResult<Value> {
        let _ = ctx;
        Ok(entity)
    }
}

/// An entity exposed over HTTP, with optional hooks and router metadata.
pub struct Collection {
    pub entity: EntityDefinition,
    pub description: Option<String>,
    pub additional_properties: Option<Map<String, Value>>,
    pub hooks: Vec<Arc<dyn CollectionHooks>>,
}

impl Collection {
    pub fn new(entity: EntityDefinition) -> Self {
        Self {
            entity,
            description: None,
            additional_properties: None,
            hooks: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_additional_properties(mut self, properties: Map<String, Value>) -> Self {
        self.additional_properties = Some(properties);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn CollectionHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    /// Route path for this collection, optionally under a router prefix.
    pub fn path(&self, prefix: Option<&str>) -> String {
        collection_path(&self.entity, prefix)
    }

    pub async fn run_get_hooks(
        &self,
        ctx: &HookContext,
        mut entities: Vec<Value>,
    ) -> HookResult<Vec<Value>> {
        for hooks in &self.hooks {
            entities = hooks.get(ctx, entities).await?;
        }
        Ok(entities)
    }

    pub async fn run_get_by_id_hooks(
        &self,
        ctx: &HookContext,
        mut entity: Option<Value>,
    ) -> HookResult<Option<Value>> {
        for hooks in &self.hooks {
            entity = hooks.get_by_id(ctx, entity).await?;
        }
        Ok(entity)
    }

    pub async fn run_create_before(&self, ctx: &HookContext, mut body: Value) -> HookResult<Value> {
        for hooks in &self.hooks {
            body = hooks.create_before(ctx, body).await?;
        }
        Ok(body)
    }

    pub async fn run_update_before(
        &self,
        ctx: &HookContext,
        existing: &Value,
        mut patch: Value,
    ) -> HookResult<Value> {
        for hooks in &self.hooks {
            patch = hooks.update_before(ctx, existing, patch).await?;
        }
        Ok(patch)
    }

    pub async fn run_delete_before(
        &self,
        ctx: &HookContext,
        entity: Option<&Value>,
    ) -> HookResult<()> {
        for hooks in &self.hooks {
            hooks.delete_before(ctx, entity).await?;
        }
        Ok(())
    }

    pub async fn run_entity_transform(
        &self,
        ctx: &HookContext,
        mut entity: Value,
    ) -> HookResult<Value> {
        for hooks in &self.hooks {
            entity = hooks.entity_transform(ctx, entity).await?;
        }
        Ok(entity)
    }
}

/// `/namespace?/pluralised-name`, lower-cased, spaces dashed.
pub fn collection_path(entity: &EntityDefinition, prefix: Option<&str>) -> String {
    let mut path = String::new();
    if let Some(prefix) = prefix {
        path.push_str(prefix.trim_end_matches('/'));
    }
    if let Some(namespace) = &entity.namespace {
        path.push('/');
        path.push_str(&namespace.to_lowercase().replace(' ', "-"));
    }
    path.push('/');
    path.push_str(&pluralize(&entity.name).to_lowercase().replace(' ', "-"));
    path
}

/// English pluralisation, covering the common cases.
fn pluralize(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        if lower.ends_with('s') {
            return name.to_string();
        }
        return format!("{}es", name);
    }
    if let Some(stem) = name.strip_suffix('y') {
        let preceded_by_vowel = stem
            .chars()
            .last()
            .is_some_and(|c| "aeiou".contains(c.to_ascii_lowercase()));
        if !preceded_by_vowel {
            return format!("{}ies", stem);
        }
    }
    format!("{}s", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct RejectUpdates;

    #[async_trait]
    impl CollectionHooks for RejectUpdates {
        async fn update_before(
            &self,
            _ctx: &HookContext,
            _existing: &Value,
            _patch: Value,
        ) -> HookResult<Value> {
            Err(HookError::with_status("Test", 401))
        }
    }

    struct Stamp(&'static str);

    #[async_trait]
    impl CollectionHooks for Stamp {
        async fn create_before(&self, _ctx: &HookContext, mut body: Value) -> HookResult<Value> {
            let trail = format!(
                "{}{}",
                body.get("trail").and_then(Value::as_str).unwrap_or(""),
                self.0
            );
            body["trail"] = json!(trail);
            Ok(body)
        }
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("planet"), "planets");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("planets"), "planets");
    }

    #[test]
    fn test_collection_path() {
        let entity = EntityDefinition::new("planet");
        assert_eq!(collection_path(&entity, None), "/planets");

        let entity = EntityDefinition::new("Launch Site").with_namespace("space");
        assert_eq!(collection_path(&entity, None), "/space/launch-sites");
        assert_eq!(
            collection_path(&entity, Some("/api/")),
            "/api/space/launch-sites"
        );
    }

    #[tokio::test]
    async fn test_hooks_thread_in_declared_order() {
        let collection = Collection::new(EntityDefinition::new("planets"))
            .with_hooks(Arc::new(Stamp("a")))
            .with_hooks(Arc::new(Stamp("b")));
        let ctx = HookContext::default();

        let body = collection
            .run_create_before(&ctx, json!({"name": "Earth"}))
            .await
            .unwrap();
        assert_eq!(body["trail"], json!("ab"));
    }

    #[tokio::test]
    async fn test_hook_error_stops_chain() {
        let collection =
            Collection::new(EntityDefinition::new("planets")).with_hooks(Arc::new(RejectUpdates));
        let ctx = HookContext::default();

        let err = collection
            .run_update_before(&ctx, &json!({"id": "p1"}), json!({"name": "X"}))
            .await
            .unwrap_err();
        assert_eq!(err.status_or_default(), 401);
        assert_eq!(err.message, "Test");
    }

    #[tokio::test]
    async fn test_default_hooks_pass_through() {
        struct Noop;
        #[async_trait]
        impl CollectionHooks for Noop {}

        let collection =
            Collection::new(EntityDefinition::new("planets")).with_hooks(Arc::new(Noop));
        let ctx = HookContext::default();
        let entities = collection
            .run_get_hooks(&ctx, vec![json!({"id": "p1"})])
            .await
            .unwrap();
        assert_eq!(entities.len(), 1);
    }
}
