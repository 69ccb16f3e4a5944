//! The engine context: every collaborator the engine needs, wired once.

use std::sync::Arc;

use crate::compute::pool::ExecutionPools;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::hierarchy::key::{CacheKeyService, Sha256KeyService};
use crate::index::status::{MemoryStatusStore, StatusStore};
use crate::member::{MemberStoreBackend, MemoryMemberBackend};
use crate::model::ModelProvider;
use crate::query::source::DataSource;

/// Shared collaborators of the builder, generator, executor and manager.
///
/// Constructed once per process through [`EngineContext::builder`] and
/// passed by reference (or behind an `Arc`) to the components using it.
#[derive(Debug)]
pub struct EngineContext {
    config: EngineConfig,
    model: Arc<dyn ModelProvider>,
    source: Arc<dyn DataSource>,
    backend: Arc<dyn MemberStoreBackend>,
    status_store: Arc<dyn StatusStore>,
    key_service: Arc<dyn CacheKeyService>,
    pools: ExecutionPools,
}

impl EngineContext {
    /// Start a builder around the two collaborators without a default.
    pub fn builder(
        model: Arc<dyn ModelProvider>,
        source: Arc<dyn DataSource>,
    ) -> EngineContextBuilder {
        EngineContextBuilder {
            config: EngineConfig::default(),
            model,
            source,
            backend: None,
            status_store: None,
            key_service: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<dyn ModelProvider> {
        &self.model
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    pub fn backend(&self) -> &Arc<dyn MemberStoreBackend> {
        &self.backend
    }

    pub fn status_store(&self) -> &Arc<dyn StatusStore> {
        &self.status_store
    }

    pub fn key_service(&self) -> &Arc<dyn CacheKeyService> {
        &self.key_service
    }

    pub fn pools(&self) -> &ExecutionPools {
        &self.pools
    }
}

/// Builder for [`EngineContext`]. Unset collaborators default to their
/// in-memory implementations.
#[derive(Debug)]
pub struct EngineContextBuilder {
    config: EngineConfig,
    model: Arc<dyn ModelProvider>,
    source: Arc<dyn DataSource>,
    backend: Option<Arc<dyn MemberStoreBackend>>,
    status_store: Option<Arc<dyn StatusStore>>,
    key_service: Option<Arc<dyn CacheKeyService>>,
}

impl EngineContextBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn MemberStoreBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn status_store(mut self, status_store: Arc<dyn StatusStore>) -> Self {
        self.status_store = Some(status_store);
        self
    }

    pub fn key_service(mut self, key_service: Arc<dyn CacheKeyService>) -> Self {
        self.key_service = Some(key_service);
        self
    }

    pub fn build(self) -> Result<EngineContext> {
        self.config.validate()?;
        let pools = ExecutionPools::new(self.config.effective_worker_threads());
        Ok(EngineContext {
            pools,
            config: self.config,
            model: self.model,
            source: self.source,
            backend: self
                .backend
                .unwrap_or_else(|| Arc::new(MemoryMemberBackend::new_default())),
            status_store: self
                .status_store
                .unwrap_or_else(|| Arc::new(MemoryStatusStore::new())),
            key_service: self
                .key_service
                .unwrap_or_else(|| Arc::new(Sha256KeyService)),
        })
    }
}
