//! The store itself: owns the connection pool, dispatches on the
//! connection address, and orchestrates entity registration.

use crate::collection::Collection;
use crate::entity::{full_entity_name, EntityDefinition};
use crate::error::{Result, SuperSaveError};
use crate::migrations::{self, MigrationStep};
use crate::repository::{new_registry, EntityRepository, RepositoryRegistry};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Active database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Sqlite,
    Mysql,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Sqlite => write!(f, "sqlite"),
            Engine::Mysql => write!(f, "mysql"),
        }
    }
}

/// The underlying connection pool, one variant per compiled engine.
#[derive(Clone)]
pub enum DatabasePool {
    #[cfg(feature = "sqlite")]
    Sqlite(sqlx::sqlite::SqlitePool),
    #[cfg(feature = "mysql")]
    Mysql(sqlx::mysql::MySqlPool),
}

impl DatabasePool {
    pub fn engine(&self) -> Engine {
        match self {
            #[cfg(feature = "sqlite")]
            DatabasePool::Sqlite(_) => Engine::Sqlite,
            #[cfg(feature = "mysql")]
            DatabasePool::Mysql(_) => Engine::Mysql,
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn as_sqlite(&self) -> Option<&sqlx::sqlite::SqlitePool> {
        match self {
            DatabasePool::Sqlite(pool) => Some(pool),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    #[cfg(feature = "mysql")]
    pub fn as_mysql(&self) -> Option<&sqlx::mysql::MySqlPool> {
        match self {
            DatabasePool::Mysql(pool) => Some(pool),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    pub async fn close(&self) {
        match self {
            #[cfg(feature = "sqlite")]
            DatabasePool::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "mysql")]
            DatabasePool::Mysql(pool) => pool.close().await,
        }
    }
}

/// Construction-time configuration.
#[derive(Default)]
pub struct SuperSaveOptions {
    /// Suppress the schema synchronizer on `add_entity`.
    pub skip_sync: bool,
    /// Suppress the user-migration runner on startup.
    pub skip_migrations: bool,
    /// User migrations, in execution order.
    pub migrations: Vec<Arc<dyn MigrationStep>>,
}

/// Entity store over a SQLite or MySQL backend.
///
/// Repositories are registered once per entity and shared; multiple
/// stores may coexist, nothing lives in process globals.
pub struct SuperSave {
    pool: DatabasePool,
    options: SuperSaveOptions,
    registry: RepositoryRegistry,
    collections: RwLock<Vec<Arc<Collection>>>,
    http_prefix: Mutex<Option<String>>,
}

impl SuperSave {
    /// Open a store from a connection address: `sqlite://<path>` (or
    /// `sqlite::memory:`) selects SQLite, anything else is treated as a
    /// MySQL DSN.
    pub async fn open(address: &str) -> Result<Self> {
        Self::open_with(address, SuperSaveOptions::default()).await
    }

    pub async fn open_with(address: &str, options: SuperSaveOptions) -> Result<Self> {
        let pool = Self::connect(address).await?;
        let store = Self {
            pool,
            options,
            registry: new_registry(),
            collections: RwLock::new(Vec::new()),
            http_prefix: Mutex::new(None),
        };
        if store.options.skip_migrations {
            debug!("skipping user migrations");
        } else {
            store.run_migrations().await?;
        }
        Ok(store)
    }

    async fn connect(address: &str) -> Result<DatabasePool> {
        if address.starts_with("sqlite:") {
            #[cfg(feature = "sqlite")]
            {
                return Ok(DatabasePool::Sqlite(crate::sqlite::connect(address).await?));
            }
            #[cfg(not(feature = "sqlite"))]
            {
                return Err(SuperSaveError::Configuration(
                    "sqlite address given, but the crate was built without the sqlite feature"
                        .to_string(),
                ));
            }
        }
        #[cfg(feature = "mysql")]
        {
            Ok(DatabasePool::Mysql(crate::mysql::connect(address).await?))
        }
        #[cfg(not(feature = "mysql"))]
        {
            let _ = address;
            Err(SuperSaveError::Configuration(
                "mysql address given, but the crate was built without the mysql feature"
                    .to_string(),
            ))
        }
    }

    /// Register an entity: create its base table when missing, bring the
    /// schema in shape, and hand out the repository.
    ///
    /// Re-adding a known entity returns the cached repository.
    pub async fn add_entity(
        &self,
        definition: EntityDefinition,
    ) -> Result<Arc<dyn EntityRepository>> {
        let key = definition.full_name();
        if let Some(existing) = self.registry.read().await.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let table = definition.table_name();
        debug!(entity = %key, table = %table, "registering entity");

        let repository: Arc<dyn EntityRepository> = match &self.pool {
            #[cfg(feature = "sqlite")]
            DatabasePool::Sqlite(pool) => {
                crate::sqlite::create_base_table(pool, &table).await?;
                if !self.options.skip_sync {
                    crate::sqlite::sync_entity(pool, &definition).await?;
                }
                Arc::new(crate::sqlite::SqliteRepository::new(
                    pool.clone(),
                    definition,
                    Arc::clone(&self.registry),
                ))
            }
            #[cfg(feature = "mysql")]
            DatabasePool::Mysql(pool) => {
                crate::mysql::create_base_table(pool, &table).await?;
                if !self.options.skip_sync {
                    crate::mysql::sync_entity(pool, &definition).await?;
                }
                Arc::new(crate::mysql::MysqlRepository::new(
                    pool.clone(),
                    definition,
                    Arc::clone(&self.registry),
                ))
            }
        };

        self.registry
            .write()
            .await
            .insert(key, Arc::clone(&repository));
        Ok(repository)
    }

    /// Register a collection for the external HTTP router; the entity
    /// is registered alongside it.
    pub async fn add_collection(
        &self,
        collection: Collection,
    ) -> Result<Arc<dyn EntityRepository>> {
        let path = collection.path(None);
        {
            let collections = self.collections.read().expect("collection list poisoned");
            if collections.iter().any(|c| c.path(None) == path) {
                return Err(SuperSaveError::Configuration(format!(
                    "duplicate collection endpoint '{}'",
                    path
                )));
            }
        }
        let repository = self.add_entity(collection.entity.clone()).await?;
        self.collections
            .write()
            .expect("collection list poisoned")
            .push(Arc::new(collection));
        Ok(repository)
    }

    /// Look up a registered repository by entity name and namespace.
    pub async fn get_repository(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Arc<dyn EntityRepository>> {
        let key = full_entity_name(name, namespace);
        let registry = self.registry.read().await;
        registry.get(&key).cloned().ok_or_else(|| {
            let mut known: Vec<&str> = registry.keys().map(String::as_str).collect();
            known.sort_unstable();
            SuperSaveError::Configuration(format!(
                "no repository registered for '{}'; known entities: {}",
                key,
                known.join(", ")
            ))
        })
    }

    /// The collections registered so far, in registration order.
    pub fn collections(&self) -> Vec<Arc<Collection>> {
        self.collections
            .read()
            .expect("collection list poisoned")
            .clone()
    }

    /// Collections grouped by namespace, for the router's overview.
    pub fn collections_by_namespace(&self) -> BTreeMap<Option<String>, Vec<Arc<Collection>>> {
        let mut grouped: BTreeMap<Option<String>, Vec<Arc<Collection>>> = BTreeMap::new();
        for collection in self.collections() {
            grouped
                .entry(collection.entity.namespace.clone())
                .or_default()
                .push(collection);
        }
        grouped
    }

    /// Fix the HTTP path prefix for the attached router. The prefix is
    /// set once; re-initialising with a different value is a
    /// configuration error.
    pub fn initialize_http_prefix(&self, prefix: &str) -> Result<()> {
        let mut slot = self.http_prefix.lock().expect("prefix slot poisoned");
        match slot.as_deref() {
            None => {
                *slot = Some(prefix.to_string());
                Ok(())
            }
            Some(existing) if existing == prefix => Ok(()),
            Some(existing) => Err(SuperSaveError::Configuration(format!(
                "http prefix already initialised as '{}', cannot change to '{}'",
                existing, prefix
            ))),
        }
    }

    pub fn http_prefix(&self) -> Option<String> {
        self.http_prefix.lock().expect("prefix slot poisoned").clone()
    }

    /// Run the configured user migrations now.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool, &self.options.migrations).await
    }

    pub fn engine(&self) -> Engine {
        self.pool.engine()
    }

    /// The raw pool, for migrations and tests.
    pub fn get_connection(&self) -> &DatabasePool {
        &self.pool
    }

    /// Release the underlying pool; repositories handed out earlier stop
    /// working.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::entity::FilterSortKind;
    use serde_json::json;

    async fn memory_store() -> SuperSave {
        SuperSave::open("sqlite::memory:").await.unwrap()
    }

    fn planet_def() -> EntityDefinition {
        EntityDefinition::new("planets").with_filter_sort_field("name", FilterSortKind::String)
    }

    #[tokio::test]
    async fn test_add_entity_returns_cached_repository() {
        let store = memory_store().await;
        let first = store.add_entity(planet_def()).await.unwrap();
        let second = store.add_entity(planet_def()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_get_repository_lists_known_keys() {
        let store = memory_store().await;
        store.add_entity(planet_def()).await.unwrap();
        store
            .add_entity(EntityDefinition::new("moons").with_namespace("space"))
            .await
            .unwrap();

        assert!(store.get_repository("planets", None).await.is_ok());

        let err = store.get_repository("comets", None).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("comets"));
        assert!(message.contains("planets"));
        assert!(message.contains("space_moons"));
    }

    #[tokio::test]
    async fn test_skip_sync_leaves_base_table() {
        let options = SuperSaveOptions {
            skip_sync: true,
            ..Default::default()
        };
        let store = SuperSave::open_with("sqlite::memory:", options).await.unwrap();
        store.add_entity(planet_def()).await.unwrap();

        let pool = store.get_connection().as_sqlite().unwrap();
        let rows = sqlx::query("PRAGMA table_info(\"planets\")")
            .fetch_all(pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_repository_usable_after_registration() {
        let store = memory_store().await;
        let repo = store.add_entity(planet_def()).await.unwrap();
        let created = repo.create(json!({"name": "Earth"})).await.unwrap();
        assert_eq!(created["name"], json!("Earth"));
    }

    #[tokio::test]
    async fn test_duplicate_collection_endpoint_rejected() {
        let store = memory_store().await;
        store
            .add_collection(crate::collection::Collection::new(planet_def()))
            .await
            .unwrap();
        let err = store
            .add_collection(crate::collection::Collection::new(planet_def()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate collection endpoint"));
        assert_eq!(store.collections().len(), 1);
    }

    #[tokio::test]
    async fn test_http_prefix_single_initialisation() {
        let store = memory_store().await;
        store.initialize_http_prefix("/api").unwrap();
        store.initialize_http_prefix("/api").unwrap();
        assert!(store.initialize_http_prefix("/other").is_err());
        assert_eq!(store.http_prefix().as_deref(), Some("/api"));
    }

    #[tokio::test]
    async fn test_engine_reported() {
        let store = memory_store().await;
        assert_eq!(store.engine(), Engine::Sqlite);
        assert_eq!(store.engine().to_string(), "sqlite");
    }
}
