//! supersave - JSON entity store over SQLite and MySQL
//!
//! supersave sits between an application and a relational backend and
//! exposes each registered entity as a programmatic repository and as a
//! REST collection contract for an attached HTTP router.
//!
//! # Architecture
//!
//! - **Entity definition → Table**: each entity lives in a table of
//!   `(id, contents)` where `contents` is the full JSON document
//! - **Filter/sort fields → Generated columns**: declared fields are
//!   materialised as indexed, database-computed columns over `contents`
//! - **Schema synchronization**: legacy TEXT tables upgrade to JSON,
//!   column layouts rebuild through a shadow table, indexes follow the
//!   declared fields incrementally
//! - **Relations**: linked entities are stored as weak `{id}` references
//!   and expanded from their own repositories on read
//! - **Migrations**: named one-shot user migrations, tracked durably
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use supersave::{
//!     EntityDefinition, EntityRepository, FilterSortKind, SortDirection, SuperSave,
//! };
//!
//! #[tokio::main]
//! async fn main() -> supersave::Result<()> {
//!     let store = SuperSave::open("sqlite://entities.db").await?;
//!
//!     let planets = store
//!         .add_entity(
//!             EntityDefinition::new("planets")
//!                 .with_filter_sort_field("name", FilterSortKind::String)
//!                 .with_filter_sort_field("distance", FilterSortKind::Number),
//!         )
//!         .await?;
//!
//!     planets.create(json!({"name": "Earth", "distance": 100})).await?;
//!
//!     let query = planets
//!         .create_query()
//!         .eq("name", json!("Earth"))?
//!         .sort("distance", SortDirection::Desc)?
//!         .limit(10)
//!         .build();
//!     let rows = planets.get_by_query(&query).await?;
//!     println!("{} matching planets", rows.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backend Support
//!
//! Enable engines via Cargo features (both are on by default):
//!
//! ```toml
//! [dependencies]
//! supersave = { version = "0.1", features = ["sqlite", "mysql"] }
//! ```

pub mod collection;
pub mod entity;
pub mod error;
pub mod manager;
pub mod migrations;
pub mod query;
pub mod repository;
pub mod schema;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mysql")]
pub mod mysql;

pub use collection::{Collection, CollectionHooks, HookContext, HookResult};
pub use entity::{EntityDefinition, FilterSortKind, Relation};
pub use error::{HookError, Result, SuperSaveError};
pub use manager::{DatabasePool, Engine, SuperSave, SuperSaveOptions};
pub use migrations::{MigrationContext, MigrationStep};
pub use query::{
    FilterOperator, LogicalGroup, LogicalOperator, Query, QueryBuilder, QueryCondition,
    QueryFilter, QuerySort, SortDirection,
};
pub use repository::EntityRepository;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRepository;

#[cfg(feature = "mysql")]
pub use mysql::MysqlRepository;

/// Prelude for common imports
pub mod prelude {
    pub use crate::collection::{Collection, CollectionHooks, HookContext};
    pub use crate::entity::{EntityDefinition, FilterSortKind, Relation};
    pub use crate::error::{HookError, Result, SuperSaveError};
    pub use crate::manager::{Engine, SuperSave, SuperSaveOptions};
    pub use crate::migrations::MigrationStep;
    pub use crate::query::{Query, QueryBuilder, SortDirection};
    pub use crate::repository::EntityRepository;
}
