use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Value kind of a declared filter/sort field.
///
/// Determines the generated column type and the expression used to derive
/// it from the stored JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterSortKind {
    String,
    Number,
    Boolean,
}

/// A typed linkage from a field on the owning entity to another entity's
/// rows.
///
/// Relation values are stored as weak `{id}` references inside the JSON
/// document and expanded from the target repository on read. Deleting the
/// referenced row does not cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// Attribute name on the owning entity.
    pub field: String,
    /// Target entity name.
    pub entity: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Whether the field holds a list of references.
    #[serde(default)]
    pub multiple: bool,
}

impl Relation {
    pub fn new(field: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            entity: entity.into(),
            namespace: None,
            multiple: false,
        }
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Registry key of the target repository.
    pub fn target_name(&self) -> String {
        full_entity_name(&self.entity, self.namespace.as_deref())
    }
}

/// Declarative description of an entity managed by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Default shape applied underneath every document on read.
    #[serde(default)]
    pub template: Map<String, Value>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Fields materialised as indexed generated columns.
    #[serde(default)]
    pub filter_sort_fields: BTreeMap<String, FilterSortKind>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            template: Map::new(),
            relations: Vec::new(),
            filter_sort_fields: BTreeMap::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_template(mut self, template: Map<String, Value>) -> Self {
        self.template = template;
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_filter_sort_field(
        mut self,
        field: impl Into<String>,
        kind: FilterSortKind,
    ) -> Self {
        self.filter_sort_fields.insert(field.into(), kind);
        self
    }

    /// Registry key: `namespace_name` when a namespace is set.
    pub fn full_name(&self) -> String {
        full_entity_name(&self.name, self.namespace.as_deref())
    }

    /// Physical table name: lower-cased slug of the full name.
    pub fn table_name(&self) -> String {
        slug(&self.full_name())
    }

    /// Kind of a filterable/sortable field, if declared.
    ///
    /// `id` is implicitly a filterable string in every collection.
    pub fn filter_sort_kind(&self, field: &str) -> Option<FilterSortKind> {
        if field == "id" {
            return Some(FilterSortKind::String);
        }
        self.filter_sort_fields.get(field).copied()
    }

    /// The relation declared on `field`, if any.
    pub fn relation(&self, field: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.field == field)
    }
}

/// Joins an entity name with its optional namespace into a registry key.
pub fn full_entity_name(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}_{}", ns, name),
        None => name.to_string(),
    }
}

fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let def = EntityDefinition::new("planets");
        assert_eq!(def.full_name(), "planets");

        let def = EntityDefinition::new("planets").with_namespace("space");
        assert_eq!(def.full_name(), "space_planets");
    }

    #[test]
    fn test_table_name_slug() {
        let def = EntityDefinition::new("Launch Sites").with_namespace("space");
        assert_eq!(def.table_name(), "space_launch_sites");
    }

    #[test]
    fn test_id_is_implicitly_filterable() {
        let def = EntityDefinition::new("planets");
        assert_eq!(def.filter_sort_kind("id"), Some(FilterSortKind::String));
        assert_eq!(def.filter_sort_kind("name"), None);
    }

    #[test]
    fn test_filter_sort_kind_lookup() {
        let def = EntityDefinition::new("planets")
            .with_filter_sort_field("name", FilterSortKind::String)
            .with_filter_sort_field("distance", FilterSortKind::Number);
        assert_eq!(def.filter_sort_kind("name"), Some(FilterSortKind::String));
        assert_eq!(
            def.filter_sort_kind("distance"),
            Some(FilterSortKind::Number)
        );
    }

    #[test]
    fn test_relation_target_name() {
        let rel = Relation::new("planet", "planets");
        assert_eq!(rel.target_name(), "planets");

        let rel = Relation::new("planet", "planets").in_namespace("space");
        assert_eq!(rel.target_name(), "space_planets");
    }

    #[test]
    fn test_definition_deserializes_from_config() {
        let def: EntityDefinition = serde_json::from_value(serde_json::json!({
            "name": "planets",
            "filter_sort_fields": {"name": "string", "visible": "boolean"},
            "relations": [{"field": "star", "entity": "stars"}]
        }))
        .unwrap();
        assert_eq!(def.filter_sort_kind("visible"), Some(FilterSortKind::Boolean));
        assert!(!def.relations[0].multiple);
    }
}
