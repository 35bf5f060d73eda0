//! Core component container for the runtime.

use std::sync::Arc;

use crate::{
    cache::CacheManager, container::ServiceContainer, errors::ErrorManager, oracle::OracleService,
    queue::QueueManager, validation::ValidationManager,
};

/// The runtime's general-purpose cache stores JSON values; typed caches (e.g.
/// the oracle's snapshot cache) live inside their owning services.
pub type SharedCache = CacheManager<serde_json::Value>;

/// Container for all initialized core components.
///
/// All components are wrapped in `Arc` for sharing across tasks; cloning the
/// struct is cheap reference counting.
#[derive(Clone)]
pub struct NectarComponents {
    errors: Arc<ErrorManager>,
    validation: Arc<ValidationManager>,
    cache: Arc<SharedCache>,
    queues: Arc<QueueManager>,
    oracle: Arc<OracleService>,
    container: Arc<ServiceContainer>,
}

impl NectarComponents {
    /// Creates a new components container. Called by the runtime builder.
    #[must_use]
    pub fn new(
        errors: Arc<ErrorManager>,
        validation: Arc<ValidationManager>,
        cache: Arc<SharedCache>,
        queues: Arc<QueueManager>,
        oracle: Arc<OracleService>,
        container: Arc<ServiceContainer>,
    ) -> Self {
        Self { errors, validation, cache, queues, oracle, container }
    }

    /// Returns a reference to the error manager.
    #[must_use]
    pub fn errors(&self) -> &Arc<ErrorManager> {
        &self.errors
    }

    /// Returns a reference to the validation manager.
    #[must_use]
    pub fn validation(&self) -> &Arc<ValidationManager> {
        &self.validation
    }

    /// Returns a reference to the shared JSON cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    /// Returns a reference to the queue manager.
    #[must_use]
    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    /// Returns a reference to the oracle service.
    #[must_use]
    pub fn oracle(&self) -> &Arc<OracleService> {
        &self.oracle
    }

    /// Returns a reference to the service container.
    #[must_use]
    pub fn container(&self) -> &Arc<ServiceContainer> {
        &self.container
    }
}
