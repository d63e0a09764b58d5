use crate::entity::{EntityDefinition, FilterSortKind};
use crate::error::{Result, SuperSaveError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Comparison operators for filter predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Equals,
    GreaterThan,
    GreaterThanEquals,
    LessThan,
    LessThanEquals,
    Like,
    In,
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOperator::Equals => write!(f, "="),
            FilterOperator::GreaterThan => write!(f, ">"),
            FilterOperator::GreaterThanEquals => write!(f, ">="),
            FilterOperator::LessThan => write!(f, "<"),
            FilterOperator::LessThanEquals => write!(f, "<="),
            FilterOperator::Like => write!(f, "LIKE"),
            FilterOperator::In => write!(f, "IN"),
        }
    }
}

/// Logical operators for condition groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOperator::And => write!(f, "AND"),
            LogicalOperator::Or => write!(f, "OR"),
            LogicalOperator::Not => write!(f, "NOT"),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// A single predicate on a filterable field
#[derive(Debug, Clone)]
pub struct QueryFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

/// A parenthesised group of conditions.
///
/// `Not` groups hold exactly one condition; `And`/`Or` hold one or more.
/// A group with zero conditions contributes nothing to the emitted SQL.
#[derive(Debug, Clone)]
pub struct LogicalGroup {
    pub operator: LogicalOperator,
    pub conditions: Vec<QueryCondition>,
}

/// Node of the condition tree
#[derive(Debug, Clone)]
pub enum QueryCondition {
    Filter(QueryFilter),
    Group(LogicalGroup),
}

/// An ORDER BY entry; the first one is primary
#[derive(Debug, Clone)]
pub struct QuerySort {
    pub field: String,
    pub direction: SortDirection,
}

/// Immutable query produced by [`QueryBuilder::build`].
///
/// Consecutive top-level conditions are joined with AND by the SQL
/// translators. A query without a limit returns all rows.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub(crate) conditions: Vec<QueryCondition>,
    pub(crate) sort: Vec<QuerySort>,
    pub(crate) limit: Option<u32>,
    pub(crate) offset: Option<u32>,
}

impl Query {
    pub fn conditions(&self) -> &[QueryCondition] {
        &self.conditions
    }

    pub fn sort(&self) -> &[QuerySort] {
        &self.sort
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }
}

/// Fluent, engine-agnostic query composer bound to an entity's declared
/// filter/sort fields.
///
/// Predicates at the same level are ANDed. [`and`](Self::and) and
/// [`or`](Self::or) open a pending group that collects subsequent
/// predicates until another group opens or the query is built;
/// [`and_all`](Self::and_all) and [`or_any`](Self::or_any) emit a
/// finalized group from already-built sub-queries. [`not`](Self::not) is
/// unary over the next predicate.
///
/// Filtering or sorting on an undeclared field is a configuration error,
/// surfaced at the call site.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    fields: BTreeMap<String, FilterSortKind>,
    conditions: Vec<QueryCondition>,
    pending: Option<LogicalGroup>,
    sort: Vec<QuerySort>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl QueryBuilder {
    /// Create a builder over the given filterable fields.
    ///
    /// `id` is always filterable and sortable as a string.
    pub fn new(fields: BTreeMap<String, FilterSortKind>) -> Self {
        let mut fields = fields;
        fields.entry("id".to_string()).or_insert(FilterSortKind::String);
        Self {
            fields,
            conditions: Vec::new(),
            pending: None,
            sort: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Builder primed with an entity definition's fields.
    pub fn for_entity(definition: &EntityDefinition) -> Self {
        Self::new(definition.filter_sort_fields.clone())
    }

    fn check_field(&self, field: &str) -> Result<()> {
        if self.fields.contains_key(field) {
            Ok(())
        } else {
            let mut known: Vec<&str> = self.fields.keys().map(String::as_str).collect();
            known.sort_unstable();
            Err(SuperSaveError::Configuration(format!(
                "'{}' is not a filterable field; declared fields: {}",
                field,
                known.join(", ")
            )))
        }
    }

    fn predicate(mut self, field: &str, operator: FilterOperator, value: Value) -> Result<Self> {
        self.check_field(field)?;
        let filter = QueryCondition::Filter(QueryFilter {
            field: field.to_string(),
            operator,
            value,
        });
        let close_not = match self.pending.as_mut() {
            Some(group) => {
                group.conditions.push(filter);
                group.operator == LogicalOperator::Not
            }
            None => {
                self.conditions.push(filter);
                false
            }
        };
        // NOT is unary: the first predicate closes the group
        if close_not {
            self.flush_pending();
        }
        Ok(self)
    }

    pub fn eq(self, field: &str, value: Value) -> Result<Self> {
        self.predicate(field, FilterOperator::Equals, value)
    }

    pub fn gt(self, field: &str, value: Value) -> Result<Self> {
        self.predicate(field, FilterOperator::GreaterThan, value)
    }

    pub fn gte(self, field: &str, value: Value) -> Result<Self> {
        self.predicate(field, FilterOperator::GreaterThanEquals, value)
    }

    pub fn lt(self, field: &str, value: Value) -> Result<Self> {
        self.predicate(field, FilterOperator::LessThan, value)
    }

    pub fn lte(self, field: &str, value: Value) -> Result<Self> {
        self.predicate(field, FilterOperator::LessThanEquals, value)
    }

    /// Shell-style `*` wildcards; translated to `%` by the SQL layer.
    pub fn like(self, field: &str, pattern: impl Into<String>) -> Result<Self> {
        self.predicate(field, FilterOperator::Like, Value::String(pattern.into()))
    }

    /// Membership in an ordered collection. An empty collection matches
    /// no rows.
    pub fn is_in(self, field: &str, values: Vec<Value>) -> Result<Self> {
        self.predicate(field, FilterOperator::In, Value::Array(values))
    }

    fn open_group(mut self, operator: LogicalOperator) -> Self {
        self.flush_pending();
        self.pending = Some(LogicalGroup {
            operator,
            conditions: Vec::new(),
        });
        self
    }

    /// Open a pending AND group; subsequent predicates join it.
    pub fn and(self) -> Self {
        self.open_group(LogicalOperator::And)
    }

    /// Open a pending OR group; subsequent predicates join it.
    pub fn or(self) -> Self {
        self.open_group(LogicalOperator::Or)
    }

    /// Negate the next predicate. To negate a composite, pass a
    /// sub-query to [`and_all`](Self::and_all) or [`or_any`](Self::or_any)
    /// instead.
    pub fn not(self) -> Self {
        self.open_group(LogicalOperator::Not)
    }

    fn closed_group(mut self, operator: LogicalOperator, queries: Vec<Query>) -> Self {
        self.flush_pending();
        let conditions: Vec<QueryCondition> = queries
            .into_iter()
            .flat_map(|q| q.conditions)
            .collect();
        if !conditions.is_empty() {
            self.conditions
                .push(QueryCondition::Group(LogicalGroup { operator, conditions }));
        }
        self
    }

    /// Finalized AND group from the top-level conditions of each
    /// sub-query.
    pub fn and_all(self, queries: Vec<Query>) -> Self {
        self.closed_group(LogicalOperator::And, queries)
    }

    /// Finalized OR group from the top-level conditions of each
    /// sub-query.
    pub fn or_any(self, queries: Vec<Query>) -> Self {
        self.closed_group(LogicalOperator::Or, queries)
    }

    pub fn sort(mut self, field: &str, direction: SortDirection) -> Result<Self> {
        self.check_field(field)?;
        self.sort.push(QuerySort {
            field: field.to_string(),
            direction,
        });
        Ok(self)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Remove any limit; the query returns all matching rows.
    pub fn unlimited(mut self) -> Self {
        self.limit = None;
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    fn flush_pending(&mut self) {
        if let Some(group) = self.pending.take() {
            if !group.conditions.is_empty() {
                self.conditions.push(QueryCondition::Group(group));
            }
        }
    }

    /// Finalize any pending group and freeze the query.
    pub fn build(mut self) -> Query {
        self.flush_pending();
        Query {
            conditions: self.conditions,
            sort: self.sort,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// A value ready to be bound to a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BindValue {
    Text(String),
    Int(i64),
    Float(f64),
    Null,
}

/// Renders a condition list as a WHERE fragment, pushing bound values in
/// placeholder order. `quote` supplies the engine's identifier quoting.
///
/// Top-level conditions join with AND; groups parenthesise; NOT prefixes
/// its single child. Returns an empty string when nothing applies.
pub(crate) fn render_conditions(
    definition: &EntityDefinition,
    conditions: &[QueryCondition],
    quote: fn(&str) -> String,
    binds: &mut Vec<BindValue>,
) -> Result<String> {
    let parts = conditions
        .iter()
        .map(|c| render_condition(definition, c, quote, binds))
        .collect::<Result<Vec<String>>>()?;
    let parts: Vec<String> = parts.into_iter().filter(|p| !p.is_empty()).collect();
    Ok(parts.join(" AND "))
}

fn render_condition(
    definition: &EntityDefinition,
    condition: &QueryCondition,
    quote: fn(&str) -> String,
    binds: &mut Vec<BindValue>,
) -> Result<String> {
    match condition {
        QueryCondition::Filter(filter) => render_filter(definition, filter, quote, binds),
        QueryCondition::Group(group) => {
            let parts = group
                .conditions
                .iter()
                .map(|c| render_condition(definition, c, quote, binds))
                .collect::<Result<Vec<String>>>()?;
            let parts: Vec<String> = parts.into_iter().filter(|p| !p.is_empty()).collect();
            if parts.is_empty() {
                return Ok(String::new());
            }
            match group.operator {
                LogicalOperator::Not => Ok(format!("NOT ({})", parts[0])),
                op => Ok(format!("({})", parts.join(&format!(" {} ", op)))),
            }
        }
    }
}

fn render_filter(
    definition: &EntityDefinition,
    filter: &QueryFilter,
    quote: fn(&str) -> String,
    binds: &mut Vec<BindValue>,
) -> Result<String> {
    let kind = definition
        .filter_sort_kind(&filter.field)
        .unwrap_or(FilterSortKind::String);
    let column = quote(&filter.field);

    match filter.operator {
        FilterOperator::In => {
            let items = match &filter.value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            if items.is_empty() {
                // IN () is invalid SQL; an empty collection matches nothing
                return Ok("1 = 0".to_string());
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            for item in &items {
                binds.push(bind_value(kind, item));
            }
            Ok(format!("{} IN ({})", column, placeholders))
        }
        FilterOperator::Equals if filter.value.is_null() => Ok(format!("{} IS NULL", column)),
        FilterOperator::Like => {
            let pattern = match &filter.value {
                Value::String(s) => s.replace('*', "%"),
                other => other.to_string().replace('*', "%"),
            };
            binds.push(BindValue::Text(pattern));
            Ok(format!("{} LIKE ?", column))
        }
        op => {
            binds.push(bind_value(kind, &filter.value));
            Ok(format!("{} {} ?", column, op))
        }
    }
}

fn bind_value(kind: FilterSortKind, value: &Value) -> BindValue {
    if kind == FilterSortKind::Boolean {
        return BindValue::Int(i64::from(is_truthy(value)));
    }
    match value {
        Value::Null => BindValue::Null,
        Value::Bool(b) => BindValue::Int(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                BindValue::Int(i)
            } else {
                BindValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => BindValue::Text(s.clone()),
        other => BindValue::Text(other.to_string()),
    }
}

/// Boolean coercion at binding time: `true`, `"true"`, `1` and `"1"` are
/// truthy; everything else is falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true" || s == "1",
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}
