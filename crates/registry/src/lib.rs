//! Control-plane view of the target system: generations, aliases and health.

pub mod control;
pub mod cutover;
pub mod errors;
pub mod health;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod retention;

pub use control::{aliases_targeting, tenant_generations, ControlPlane};
pub use cutover::AliasCutover;
pub use health::{HealthGate, HealthProbe, HealthThresholds, HealthVerdict};
pub use http::{HttpControlPlane, HttpControlPlaneConfig};
pub use memory::InMemoryControlPlane;
pub use retention::{RetentionGc, RetentionReport};
