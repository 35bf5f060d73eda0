//! # Nectar Core
//!
//! Core library for the Nectar DeFi yield dashboard's service runtime.
//!
//! This crate provides the foundational components for:
//!
//! - **[`container`]**: String-keyed dependency-injection/lifecycle registry
//!   with cycle detection, scoping, decorators, and health aggregation.
//!
//! - **[`oracle`]**: Market data aggregation from multiple unreliable upstream
//!   sources with retries, per-source circuit breakers, response validation,
//!   and graceful degradation to cached or fallback data.
//!
//! - **[`queue`]**: Named, bounded-concurrency task queues with per-task
//!   failure isolation.
//!
//! - **[`cache`]**: TTL key/value store with lazy eviction and hit/miss stats.
//!
//! - **[`validation`]**: Structural/semantic validation and sanitization of
//!   inbound request fields, plus reusable request schemas.
//!
//! - **[`errors`]**: Error taxonomy, classification, bounded recent-errors
//!   tracking, and normalized API error responses.
//!
//! - **[`config`]**: Layered configuration (defaults → TOML → environment).
//!
//! - **[`runtime`]**: Composition root wiring everything together with
//!   graceful shutdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        NectarRuntime                          │
//! │  ┌─────────────────────────────────────────────────────────┐  │
//! │  │                    ServiceContainer                     │  │
//! │  │   errorManager   validationManager   cacheManager       │  │
//! │  │   queueManager   oracleService                          │  │
//! │  └───────────────────────────┬─────────────────────────────┘  │
//! │                              │                                │
//! │  ┌───────────────────────────▼─────────────────────────────┐  │
//! │  │                      OracleService                      │  │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐    │  │
//! │  │  │  price   │ │ lending  │ │   dex    │ │   rpc    │    │  │
//! │  │  │  feed    │ │  feeds   │ │  feed    │ │ endpoint │    │  │
//! │  │  └────┬─────┘ └────┬─────┘ └────┬─────┘ └────┬─────┘    │  │
//! │  │   breaker +     breaker +    breaker +    breaker +     │  │
//! │  │   retry         retry        retry        retry         │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request Flow (snapshot)
//!
//! ```text
//! HTTP layer (external)
//!       │  get_snapshot(network)
//!       ▼
//! ┌─────────────┐
//! │  Validation │ ─── unsupported network ──► normalized 400
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │ Cache check │ ─── fresh ──► snapshot tagged "cached"
//! └──────┬──────┘
//!        ▼
//! ┌──────────────────┐    all sources failed
//! │ Concurrent       │ ─────────────────────► last known snapshot
//! │ fan-out +        │                        (stale, "cached") or
//! │ validation       │                        zeroed "fallback"
//! └──────┬───────────┘
//!        ▼
//!  snapshot tagged "live", cached for the freshness window
//! ```

pub mod cache;
pub mod config;
pub mod container;
pub mod errors;
pub mod oracle;
pub mod queue;
pub mod runtime;
pub mod validation;
