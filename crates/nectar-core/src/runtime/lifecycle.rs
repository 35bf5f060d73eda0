//! Runtime lifecycle: startup, background tasks, and graceful shutdown.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{builder::NectarRuntimeBuilder, NectarComponents, RuntimeError};
use crate::{
    config::AppConfig, container::ServiceContainer, errors::ErrorManager, oracle::OracleService,
    queue::QueueManager, validation::ValidationManager,
};

/// Main runtime handle owning components and background tasks.
///
/// Built by [`NectarRuntimeBuilder`]; [`start`](Self::start) runs container
/// `on_start` hooks and spawns background tasks, [`shutdown`](Self::shutdown)
/// reverses both. Shutdown is idempotent.
pub struct NectarRuntime {
    components: NectarComponents,
    shutdown_tx: broadcast::Sender<()>,
    config: AppConfig,
    enable_cache_janitor: bool,
    janitor_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl std::fmt::Debug for NectarRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NectarRuntime")
            .field("enable_cache_janitor", &self.enable_cache_janitor)
            .field(
                "shutdown_initiated",
                &self.shutdown_initiated.load(Ordering::SeqCst),
            )
            .finish_non_exhaustive()
    }
}

impl NectarRuntime {
    /// Creates a new builder for constructing a runtime.
    #[must_use]
    pub fn builder() -> NectarRuntimeBuilder {
        NectarRuntimeBuilder::new()
    }

    /// Called by the builder once components are wired.
    pub(super) fn new(
        components: NectarComponents,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        enable_cache_janitor: bool,
    ) -> Self {
        Self {
            components,
            shutdown_tx,
            config,
            enable_cache_janitor,
            janitor_task: parking_lot::Mutex::new(None),
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the runtime: container `on_start` hooks in dependency order,
    /// then background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Startup`] if a hook fails; the container rolls
    /// already-started services back before this returns.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        self.components.container().start_all().await?;

        if self.enable_cache_janitor {
            let handle = Self::spawn_cache_janitor(
                Arc::clone(self.components.cache()),
                self.config.cache.janitor_interval_seconds,
                self.shutdown_tx.subscribe(),
            );
            *self.janitor_task.lock() = Some(handle);
            debug!("cache janitor task started");
        }

        info!("Nectar runtime started");
        Ok(())
    }

    /// Returns a reference to all runtime components.
    #[must_use]
    pub fn components(&self) -> &NectarComponents {
        &self.components
    }

    /// Returns a reference to the application configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Convenience accessor for the oracle service.
    #[must_use]
    pub fn oracle(&self) -> &Arc<OracleService> {
        self.components.oracle()
    }

    /// Convenience accessor for the queue manager.
    #[must_use]
    pub fn queues(&self) -> &Arc<QueueManager> {
        self.components.queues()
    }

    /// Convenience accessor for the error manager.
    #[must_use]
    pub fn errors(&self) -> &Arc<ErrorManager> {
        self.components.errors()
    }

    /// Convenience accessor for the validation manager.
    #[must_use]
    pub fn validation(&self) -> &Arc<ValidationManager> {
        self.components.validation()
    }

    /// Convenience accessor for the service container.
    #[must_use]
    pub fn container(&self) -> &Arc<ServiceContainer> {
        self.components.container()
    }

    /// Creates a new shutdown receiver for external coordination.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Initiates graceful shutdown: broadcasts the signal, stops container
    /// services in reverse start order, and stops background tasks.
    ///
    /// Idempotent; a second call is a no-op.
    pub async fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("Initiating Nectar runtime shutdown");
        if self.shutdown_tx.send(()).is_err() {
            debug!("no active shutdown listeners");
        }

        self.components.container().stop_all().await;

        let janitor = self.janitor_task.lock().take();
        if let Some(janitor) = janitor {
            janitor.abort();
            debug!("cache janitor task stopped");
        }

        info!("Nectar runtime shutdown complete");
    }

    /// Waits for a shutdown signal (e.g. from a signal handler calling
    /// [`shutdown_receiver`](Self::shutdown_receiver) senders), then cleans up.
    pub async fn wait_for_shutdown(self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, runtime terminating");
        self.shutdown().await;
    }

    /// Periodically sweeps expired entries from the shared cache.
    fn spawn_cache_janitor(
        cache: Arc<super::components::SharedCache>,
        interval_seconds: u64,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_seconds.max(1)));
            // The first tick fires immediately; skip it.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(removed, "cache janitor swept expired entries");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("cache janitor shutting down");
                        break;
                    }
                }
            }
        })
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<NectarRuntime>;
    let _ = assert_sync::<NectarRuntime>;
};
