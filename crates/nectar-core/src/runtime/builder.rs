//! Builder wiring configuration and services into a runnable runtime.

use futures::FutureExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{components::SharedCache, service_names, NectarComponents, NectarRuntime};
use crate::{
    config::AppConfig,
    container::{ContainerError, Lifecycle, ServiceContainer, ServiceRegistration},
    errors::ErrorManager,
    oracle::{CircuitState, OracleService},
    queue::QueueManager,
    validation::ValidationManager,
};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A component failed to initialize.
    #[error("Runtime initialization failed: {0}")]
    Initialization(String),

    /// `start_all` failed; see the container error for the failing service.
    #[error("Runtime startup failed: {0}")]
    Startup(#[from] ContainerError),
}

/// Configuration options for the runtime builder.
#[derive(Clone)]
struct RuntimeOptions {
    enable_cache_janitor: bool,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_cache_janitor: true, shutdown_channel_capacity: 16 }
    }
}

/// Builder for constructing a [`NectarRuntime`].
///
/// # Example
///
/// ```no_run
/// # use nectar_core::{config::AppConfig, runtime::NectarRuntimeBuilder};
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::load()?;
/// let runtime = NectarRuntimeBuilder::new()
///     .with_config(config)
///     .disable_cache_janitor()
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct NectarRuntimeBuilder {
    config: Option<AppConfig>,
    options: RuntimeOptions,
}

impl Default for NectarRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NectarRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, options: RuntimeOptions::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Disables the periodic expired-entry sweep on the shared cache.
    #[must_use]
    pub fn disable_cache_janitor(mut self) -> Self {
        self.options.enable_cache_janitor = false;
        self
    }

    /// Sets custom shutdown channel capacity (default: 16).
    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity;
        self
    }

    /// Builds the runtime: validates config, constructs managers, and wires
    /// them into the service container. Background tasks and `on_start` hooks
    /// run later, in [`NectarRuntime::start`].
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if configuration is missing or invalid, or a
    /// component fails to initialize.
    pub fn build(self) -> Result<NectarRuntime, RuntimeError> {
        let config = self.config.ok_or_else(|| {
            RuntimeError::ConfigValidation("No configuration provided".to_string())
        })?;
        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            environment = %config.environment,
            sources = config.oracle.sources.len(),
            networks = config.networks.allowed.len(),
            cache_janitor = self.options.enable_cache_janitor,
            "Initializing Nectar runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);

        let container = Arc::new(ServiceContainer::new());
        Self::register_services(&container, &config);
        debug!("service registrations installed");

        // Resolving through the container exercises the real dependency
        // graph; typed handles are kept for the embedding layer.
        let errors: Arc<ErrorManager> = container
            .get_as(service_names::ERROR_MANAGER)
            .map_err(|e| RuntimeError::Initialization(e.to_string()))?;
        let validation: Arc<ValidationManager> = container
            .get_as(service_names::VALIDATION_MANAGER)
            .map_err(|e| RuntimeError::Initialization(e.to_string()))?;
        let cache: Arc<SharedCache> = container
            .get_as(service_names::CACHE_MANAGER)
            .map_err(|e| RuntimeError::Initialization(e.to_string()))?;
        let queues: Arc<QueueManager> = container
            .get_as(service_names::QUEUE_MANAGER)
            .map_err(|e| RuntimeError::Initialization(e.to_string()))?;
        let oracle: Arc<OracleService> = container
            .get_as(service_names::ORACLE_SERVICE)
            .map_err(|e| RuntimeError::Initialization(e.to_string()))?;
        debug!("core services resolved");

        let components =
            NectarComponents::new(errors, validation, cache, queues, oracle, container);

        Ok(NectarRuntime::new(
            components,
            shutdown_tx,
            config,
            self.options.enable_cache_janitor,
        ))
    }

    /// Installs the canonical service registrations.
    fn register_services(container: &Arc<ServiceContainer>, config: &AppConfig) {
        container.register(ServiceRegistration::build(service_names::ERROR_MANAGER, |_deps| {
            Ok(ErrorManager::new())
        }));

        let validation_config = config.clone();
        container.register(ServiceRegistration::build(
            service_names::VALIDATION_MANAGER,
            move |_deps| Ok(ValidationManager::from_config(&validation_config)),
        ));

        let cache_ttl = config.default_cache_ttl();
        container.register(ServiceRegistration::build(
            service_names::CACHE_MANAGER,
            move |_deps| Ok(SharedCache::with_default_ttl(cache_ttl)),
        ));

        container.register(
            ServiceRegistration::build(service_names::QUEUE_MANAGER, |_deps| {
                Ok(QueueManager::new())
            })
            // Dispatchers stop with the runtime, dropping pending tasks
            // (queues are non-durable).
            .on_stop(Arc::new(|instance| {
                async move {
                    if let Ok(queues) = instance.downcast::<QueueManager>() {
                        queues.shutdown();
                    }
                    Ok(())
                }
                .boxed()
            })),
        );

        let oracle_config = config.clone();
        container.register(
            ServiceRegistration::build(service_names::ORACLE_SERVICE, move |deps| {
                let validation: Arc<ValidationManager> =
                    deps.get(service_names::VALIDATION_MANAGER)?;
                let errors: Arc<ErrorManager> = deps.get(service_names::ERROR_MANAGER)?;
                OracleService::from_config(&oracle_config, validation, errors).map_err(|e| {
                    ContainerError::FactoryFailed {
                        name: service_names::ORACLE_SERVICE.to_string(),
                        message: e.to_string(),
                    }
                })
            })
            .lifecycle(Lifecycle::Singleton)
            .depends_on([service_names::VALIDATION_MANAGER, service_names::ERROR_MANAGER])
            // Healthy while no source circuit is stuck open.
            .with_health_check(Arc::new(|instance| {
                async move {
                    match instance.downcast::<OracleService>() {
                        Ok(oracle) => oracle
                            .health_status()
                            .iter()
                            .all(|source| source.circuit_state != CircuitState::Open),
                        Err(_) => false,
                    }
                }
                .boxed()
            })),
        );
    }
}
