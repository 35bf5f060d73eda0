//! Runtime initialization and lifecycle management.
//!
//! The runtime is the composition root: it loads configuration, wires every
//! manager into the [`ServiceContainer`](crate::container::ServiceContainer)
//! under its canonical name, starts them in dependency order, and
//! coordinates graceful shutdown through a broadcast channel.
//!
//! # Example
//!
//! ```no_run
//! use nectar_core::{config::AppConfig, runtime::NectarRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!
//!     let runtime = NectarRuntime::builder().with_config(config).build()?;
//!     runtime.start().await?;
//!
//!     // Hand components to the HTTP layer.
//!     let oracle = runtime.oracle();
//!     let _snapshot = oracle.get_snapshot("bsc").await?;
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{NectarRuntimeBuilder, RuntimeError};
pub use components::NectarComponents;
pub use lifecycle::NectarRuntime;

/// Canonical service names used for container registrations.
pub mod service_names {
    pub const ERROR_MANAGER: &str = "errorManager";
    pub const VALIDATION_MANAGER: &str = "validationManager";
    pub const CACHE_MANAGER: &str = "cacheManager";
    pub const QUEUE_MANAGER: &str = "queueManager";
    pub const ORACLE_SERVICE: &str = "oracleService";
}
