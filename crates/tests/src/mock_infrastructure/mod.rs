//! Reusable mock types for runtime tests.

pub mod source_mock;

pub use source_mock::{MockBehavior, MockSource};
