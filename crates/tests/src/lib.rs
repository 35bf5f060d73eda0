//! Integration tests for the Nectar service runtime.
//!
//! Test modules:
//!
//! - `container_tests`: Lifecycle scenarios across the service container:
//!   request scopes, decorators, startup ordering
//! - `queue_tests`: Bounded-concurrency guarantees, including the rebalance
//!   end-to-end scenario (10 tasks, peak concurrency ≤ 2)
//! - `oracle_tests`: Cache/retry/circuit-breaker behavior against scripted
//!   sources with call-count assertions
//! - `http_source_tests`: `HttpMarketSource` against a local mock HTTP server
//! - `config_tests`: Layered configuration (TOML file + env overrides)
//! - `runtime_tests`: Full runtime wiring, health surfaces, shutdown
//! - `mock_infrastructure`: Reusable scripted sources with call counters
//!
//! ## Running
//!
//! ```bash
//! cargo test --package tests
//! ```
//!
//! No external services are required; HTTP tests run against an in-process
//! mock server.

#[cfg(test)]
mod container_tests;


#[cfg(test)]
mod oracle_tests;

#[cfg(test)]
mod http_source_tests;

#[cfg(test)]
mod config_tests;

#[cfg(test)]
mod runtime_tests;

/// Mock infrastructure for testing.
pub mod mock_infrastructure;
