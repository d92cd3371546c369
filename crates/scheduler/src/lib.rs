//! Scheduling core of the blue/green orchestrator.
//!
//! A [`watcher::SnapshotWatcher`] feeds a shared [`queue::TaskQueue`]; a pool of workers
//! ([`worker`]) admits each task through the health gate, loads it through a
//! [`executor::SnapshotLoader`], cuts the tenant alias over and prunes old generations. Failed
//! loads come back through the [`retry::RetryScheduler`]. [`orchestrator::Orchestrator`] owns
//! startup validation and graceful shutdown.

pub mod error;
pub mod executor;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod status;
pub mod watcher;
pub mod worker;

pub use error::SchedulerError;
pub use executor::SnapshotLoader;
pub use model::{OrchestratorConfig, TaskOutcome};
pub use orchestrator::{Orchestrator, ShutdownReport};
pub use queue::TaskQueue;
pub use stats::{StatsRecorder, StatsSnapshot};
pub use status::{LifecycleStatus, StatusDocument, StatusReporter};
pub use watcher::SnapshotWatcher;
