//! Blue/green generation rollout for bulk-loaded graph databases.
//!
//! Exposes the binary's building blocks for integration testing.

pub mod cli;
pub mod config;
pub mod loader;
pub mod metrics;

pub use config::{AppConfig, ConfigValidationError};
pub use loader::ArrowSnapshotLoader;
