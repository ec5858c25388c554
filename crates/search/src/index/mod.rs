//! The persistence gateway.
//!
//! [`Index`] is the single entry point for reading and writing entities. It
//! owns the store handle, the descriptor registry, the consistency delay-line,
//! the entity cache and the operational metrics. Construct one at startup and
//! share it (typically as `Arc<Index>`).
//!
//! Error policy: only [`ConcurrencyError::OptimisticLock`] surfaces as a
//! distinct, recoverable error, and only from the `try_*` operations. Check
//! failures of the entity itself pass through unchanged. Every other failure
//! is logged and returned as a [`HandledError`].
//!
//! [`ConcurrencyError::OptimisticLock`]: crate::error::ConcurrencyError::OptimisticLock

mod cache;
mod delay_line;
mod metrics;
mod reindex;

use std::future::Future;
use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::config::IndexConfig;
use crate::core::{DeleteRequest, DocumentStore, WriteMode, WriteRequest};
use crate::error::{EntityError, HandledError, IndexError, IndexResult};
use crate::query::Query;
use crate::schema::{Entity, EntityDescriptor, NEW_ID, Schema};

pub use cache::EntityCache;
pub use delay_line::DelayLine;
pub use metrics::{IndexMetrics, MetricsSnapshot};
pub use reindex::{ReindexJobs, ReindexProgress, ReindexProgressError, ReindexStatus};

/// Write precondition of a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveMode {
    Create,
    Versioned,
    Overwrite,
}

/// Persistence gateway for entities.
#[derive(Debug)]
pub struct Index {
    store: Arc<dyn DocumentStore>,
    schema: Arc<Schema>,
    config: IndexConfig,
    metrics: Arc<IndexMetrics>,
    delay_line: DelayLine,
    cache: EntityCache,
    jobs: ReindexJobs,
}

impl Index {
    /// Creates an index over `store` with an empty schema.
    ///
    /// Starts the delay-line consumer, so this must be called within a tokio
    /// runtime.
    pub fn new(store: Arc<dyn DocumentStore>, config: IndexConfig) -> Self {
        Self::with_schema(store, Arc::new(Schema::new()), config)
    }

    /// Creates an index sharing an existing schema registry.
    pub fn with_schema(
        store: Arc<dyn DocumentStore>,
        schema: Arc<Schema>,
        config: IndexConfig,
    ) -> Self {
        let metrics = Arc::new(IndexMetrics::new());
        let delay_line = DelayLine::start(config.delay_line.clone(), metrics.clone());
        let cache = EntityCache::new(config.cache_ttl(), config.cache_capacity);
        tracing::info!(
            store = store.name(),
            prefix = %config.index_prefix,
            "Index initialized"
        );
        Self {
            store,
            schema,
            config,
            metrics,
            delay_line,
            cache,
            jobs: ReindexJobs::default(),
        }
    }

    /// Returns the document store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Returns the descriptor registry.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Returns the operational metrics.
    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    /// Returns the global entity cache.
    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Registers `E` so that mappings and reindexing know about it.
    pub fn register<E: Entity>(&self) -> Arc<EntityDescriptor> {
        self.schema.register::<E>()
    }

    /// Returns the physical index name of `E`.
    pub fn physical_index<E: Entity>(&self) -> String {
        let descriptor = self.schema.descriptor::<E>();
        self.config
            .physical_index(descriptor.index(), descriptor.type_name())
    }

    /// Starts a query over entities of type `E`.
    pub fn select<E: Entity>(&self) -> Query<'_, E> {
        Query::new(self)
    }

    /// Checks that the store is reachable.
    pub async fn health_check(&self) -> IndexResult<()> {
        self.store.health_check().await
    }

    /// Creates the physical indices of all registered types.
    pub async fn ensure_mappings(&self) -> IndexResult<()> {
        for descriptor in self.schema.descriptors() {
            let index = self
                .config
                .physical_index(descriptor.index(), descriptor.type_name());
            self.store
                .ensure_index(&index, &descriptor.create_mapping())
                .await
                .map_err(|e| {
                    HandledError::wrap("ensure_mappings", descriptor.type_name(), "-", e)
                })?;
            tracing::debug!(index = %index, type_name = %descriptor.type_name(), "Mapping ensured");
        }
        Ok(())
    }

    /// Makes all writes of `E` visible to searches.
    pub async fn refresh<E: Entity>(&self) -> IndexResult<()> {
        let descriptor = self.schema.descriptor::<E>();
        self.store
            .refresh(&self.physical_index::<E>())
            .await
            .map_err(|e| HandledError::wrap("refresh", descriptor.type_name(), "-", e))
    }

    /// Makes all writes of all registered types visible to searches.
    pub async fn refresh_all(&self) -> IndexResult<()> {
        for descriptor in self.schema.descriptors() {
            let index = self
                .config
                .physical_index(descriptor.index(), descriptor.type_name());
            self.store
                .refresh(&index)
                .await
                .map_err(|e| HandledError::wrap("refresh", descriptor.type_name(), "-", e))?;
        }
        Ok(())
    }

    /// Creates a new entity.
    ///
    /// The id is taken from [`Entity::compute_possible_id`] or generated. Fails
    /// with [`EntityError::AlreadyExists`] if a document with the id exists.
    #[instrument(skip(self, entity))]
    pub async fn create<E: Entity>(&self, entity: &mut E) -> IndexResult<()> {
        if !entity.is_new() {
            let descriptor = self.schema.descriptor::<E>();
            return Err(EntityError::InvalidState {
                entity_type: descriptor.type_name().to_string(),
                id: entity.id().to_string(),
                message: "entity has already been created".to_string(),
            }
            .into());
        }
        self.save(entity, SaveMode::Create, "create").await
    }

    /// Writes the entity, failing fatally if it was modified concurrently.
    ///
    /// New entities are created.
    #[instrument(skip(self, entity), fields(id = %entity.id()))]
    pub async fn update<E: Entity>(&self, entity: &mut E) -> IndexResult<()> {
        self.try_update(entity)
            .await
            .map_err(|e| self.fatal_lock::<E>("update", entity.id(), e))
    }

    /// Writes the entity if its version is still current.
    ///
    /// Returns [`ConcurrencyError::OptimisticLock`](crate::error::ConcurrencyError::OptimisticLock)
    /// if the document changed since it was read. New entities are created.
    #[instrument(skip(self, entity), fields(id = %entity.id()))]
    pub async fn try_update<E: Entity>(&self, entity: &mut E) -> IndexResult<()> {
        if entity.is_new() {
            return self.save(entity, SaveMode::Create, "create").await;
        }
        self.save(entity, SaveMode::Versioned, "update").await
    }

    /// Writes the entity without a version check; the last write wins.
    ///
    /// New entities are created.
    #[instrument(skip(self, entity), fields(id = %entity.id()))]
    pub async fn override_entity<E: Entity>(&self, entity: &mut E) -> IndexResult<()> {
        if entity.is_new() {
            return self.save(entity, SaveMode::Create, "create").await;
        }
        self.save(entity, SaveMode::Overwrite, "override").await
    }

    async fn save<E: Entity>(
        &self,
        entity: &mut E,
        mode: SaveMode,
        operation: &'static str,
    ) -> IndexResult<()> {
        let descriptor = self.schema.descriptor::<E>();
        entity.before_save_checks();
        entity.perform_save_checks()?;
        entity.before_save();

        let (id, write_mode) = match mode {
            SaveMode::Create => (
                entity
                    .compute_possible_id()
                    .filter(|id| !id.is_empty() && id != NEW_ID)
                    .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
                WriteMode::Create,
            ),
            SaveMode::Versioned => (
                entity.id().to_string(),
                WriteMode::Versioned(entity.version()),
            ),
            SaveMode::Overwrite => (entity.id().to_string(), WriteMode::Overwrite),
        };

        let source = descriptor
            .write_to(entity)
            .map_err(|e| HandledError::wrap(operation, descriptor.type_name(), &id, e))?;
        let routing = descriptor.routing_value(&source);
        if descriptor.has_routing() && routing.is_none() {
            tracing::warn!(
                entity_type = %descriptor.type_name(),
                id = %id,
                "Saving routed entity without a routing value"
            );
        }

        let request = WriteRequest {
            index: self
                .config
                .physical_index(descriptor.index(), descriptor.type_name()),
            type_name: descriptor.type_name().to_string(),
            id: id.clone(),
            routing,
            source,
            mode: write_mode,
        };

        match self.store.write(request).await {
            Ok(version) => {
                entity.meta_mut().set(id.clone(), version);
                self.cache
                    .remove(&EntityCache::key(descriptor.type_name(), &id));
                entity.after_save();
                tracing::debug!(
                    entity_type = %descriptor.type_name(),
                    id = %id,
                    version,
                    operation,
                    "Saved entity"
                );
                Ok(())
            }
            Err(e) => Err(self.classify(operation, descriptor.type_name(), &id, e)),
        }
    }

    /// Finds an entity by id in its own index.
    ///
    /// `"new"` yields a fresh blank entity; an unknown id yields `None`.
    pub async fn find<E: Entity>(&self, id: &str) -> IndexResult<Option<E>> {
        self.find_in(None, None, id).await
    }

    /// Finds an entity by id, optionally in another logical index and with a
    /// routing key.
    #[instrument(skip(self))]
    pub async fn find_in<E: Entity>(
        &self,
        index: Option<&str>,
        routing: Option<&str>,
        id: &str,
    ) -> IndexResult<Option<E>> {
        if id == NEW_ID {
            return Ok(Some(E::default()));
        }
        if id.is_empty() {
            return Ok(None);
        }

        let descriptor = self.schema.descriptor::<E>();
        if descriptor.has_routing() && routing.is_none() {
            tracing::warn!(
                entity_type = %descriptor.type_name(),
                id = %id,
                "Finding routed entity without routing; the lookup may miss it"
            );
        } else if !descriptor.has_routing() && routing.is_some() {
            tracing::warn!(
                entity_type = %descriptor.type_name(),
                id = %id,
                "Finding unrouted entity with routing"
            );
        }

        let physical = self.config.physical_index(
            index.unwrap_or(descriptor.index()),
            descriptor.type_name(),
        );
        let doc = self
            .store
            .get(&physical, id, routing)
            .await
            .map_err(|e| HandledError::wrap("find", descriptor.type_name(), id, e))?;

        doc.map(|doc| descriptor.read_source(&doc.id, doc.version, doc.source))
            .transpose()
            .map_err(|e| HandledError::wrap("find", descriptor.type_name(), id, e))
    }

    /// Finds an entity using the global cache.
    ///
    /// Returns the entity and whether it came from the cache.
    pub async fn fetch<E: Entity + Clone>(&self, id: &str) -> IndexResult<(Option<E>, bool)> {
        self.fetch_from_cache(&self.cache, id).await
    }

    /// Finds an entity using `cache`.
    ///
    /// Only found entities are cached.
    pub async fn fetch_from_cache<E: Entity + Clone>(
        &self,
        cache: &EntityCache,
        id: &str,
    ) -> IndexResult<(Option<E>, bool)> {
        let descriptor = self.schema.descriptor::<E>();
        let key = EntityCache::key(descriptor.type_name(), id);
        if let Some(entity) = cache.get::<E>(&key) {
            return Ok((Some(entity), true));
        }
        let entity = self.find::<E>(id).await?;
        if let Some(entity) = &entity
            && !entity.is_new()
        {
            cache.put(key, entity.clone());
        }
        Ok((entity, false))
    }

    /// Deletes the entity, failing fatally if it was modified concurrently.
    #[instrument(skip(self, entity), fields(id = %entity.id()))]
    pub async fn delete<E: Entity>(&self, entity: &E) -> IndexResult<()> {
        self.try_delete(entity)
            .await
            .map_err(|e| self.fatal_lock::<E>("delete", entity.id(), e))
    }

    /// Deletes the entity if its version is still current.
    #[instrument(skip(self, entity), fields(id = %entity.id()))]
    pub async fn try_delete<E: Entity>(&self, entity: &E) -> IndexResult<()> {
        self.remove(entity, Some(entity.version()), "delete").await
    }

    /// Deletes the entity regardless of its version.
    #[instrument(skip(self, entity), fields(id = %entity.id()))]
    pub async fn force_delete<E: Entity>(&self, entity: &E) -> IndexResult<()> {
        self.remove(entity, None, "force_delete").await
    }

    async fn remove<E: Entity>(
        &self,
        entity: &E,
        expected_version: Option<i64>,
        operation: &'static str,
    ) -> IndexResult<()> {
        if entity.is_new() {
            return Ok(());
        }
        entity.perform_delete_checks()?;

        let descriptor = self.schema.descriptor::<E>();
        let source = descriptor
            .write_to(entity)
            .map_err(|e| HandledError::wrap(operation, descriptor.type_name(), entity.id(), e))?;
        let request = DeleteRequest {
            index: self
                .config
                .physical_index(descriptor.index(), descriptor.type_name()),
            type_name: descriptor.type_name().to_string(),
            id: entity.id().to_string(),
            routing: descriptor.routing_value(&source),
            expected_version,
        };

        let existed = self
            .store
            .delete(request)
            .await
            .map_err(|e| self.classify(operation, descriptor.type_name(), entity.id(), e))?;
        self.cache
            .remove(&EntityCache::key(descriptor.type_name(), entity.id()));
        if !existed {
            tracing::debug!(
                entity_type = %descriptor.type_name(),
                id = %entity.id(),
                "Entity was already deleted"
            );
        }

        entity.cascade_delete(self).await.map_err(|e| {
            HandledError::wrap("cascade_delete", descriptor.type_name(), entity.id(), e)
        })
    }

    /// Runs `unit_of_work` until it succeeds, retrying on optimistic lock failures.
    ///
    /// At most `retry_attempts` (default 3) attempts are made; the last lock
    /// failure becomes a [`HandledError`]. Any other error is returned
    /// immediately.
    pub async fn retry<T, F, Fut>(&self, mut unit_of_work: F) -> IndexResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IndexResult<T>>,
    {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match unit_of_work().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_optimistic_lock() && attempt < attempts => {
                    tracing::debug!(attempt, error = %e, "Retrying after optimistic lock failure");
                    attempt += 1;
                }
                Err(e) if e.is_optimistic_lock() => {
                    return Err(HandledError::wrap("retry", "-", "-", e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs `action` once recent writes are visible to searches.
    ///
    /// See [`DelayLine::call_after_update`].
    pub async fn call_after_update<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.delay_line.call_after_update(action).await;
    }

    /// Runs all actions waiting on the delay-line now.
    pub async fn flush_delay_line(&self) -> usize {
        self.delay_line.flush().await
    }

    /// Returns the number of actions waiting on the delay-line.
    pub fn pending_delayed(&self) -> usize {
        self.delay_line.pending()
    }

    /// Starts copying every index to `new_prefix` in the background.
    ///
    /// Returns the job id immediately; see [`Index::reindex_progress`].
    pub fn reindex(&self, new_prefix: &str) -> String {
        let job_id = Uuid::new_v4().to_string();
        self.jobs.insert(ReindexProgress::new(&job_id, new_prefix));
        tracing::info!(job_id = %job_id, new_prefix = %new_prefix, "Starting reindex");

        tokio::spawn(reindex::run_reindex(
            self.store.clone(),
            self.schema.clone(),
            self.config.clone(),
            new_prefix.to_string(),
            job_id.clone(),
            self.jobs.clone(),
        ));
        job_id
    }

    /// Returns the progress of a reindex job.
    pub fn reindex_progress(&self, job_id: &str) -> Option<ReindexProgress> {
        self.jobs.get(job_id)
    }

    /// Returns the reindex job registry.
    pub fn reindex_jobs(&self) -> &ReindexJobs {
        &self.jobs
    }

    /// Counts lock failures and wraps everything unexpected.
    fn classify(
        &self,
        operation: &'static str,
        type_name: &str,
        id: &str,
        e: IndexError,
    ) -> IndexError {
        match e {
            e if e.is_optimistic_lock() => {
                self.metrics.record_optimistic_lock(type_name);
                tracing::debug!(
                    entity_type = %type_name,
                    id = %id,
                    operation,
                    "Optimistic lock failure"
                );
                e
            }
            e @ (IndexError::Entity(_) | IndexError::Handled(_)) => e,
            e => HandledError::wrap(operation, type_name, id, e),
        }
    }

    /// Turns a lock failure of a non-`try` operation into a fatal error.
    fn fatal_lock<E: Entity>(&self, operation: &'static str, id: &str, e: IndexError) -> IndexError {
        if e.is_optimistic_lock() {
            HandledError::wrap(operation, self.schema.descriptor::<E>().type_name(), id, e)
        } else {
            e
        }
    }
}
