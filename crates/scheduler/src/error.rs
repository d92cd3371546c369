use std::path::PathBuf;

use bluegreen_core_types::{BlueGreenError, ErrorKind};
use thiserror::Error;

/// Failures that stop the orchestrator from starting.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("data path not found: {0}")]
    DataPathNotFound(PathBuf),
    #[error("failed to connect to target: {0}")]
    TargetUnreachable(BlueGreenError),
    #[error("orchestrator already started")]
    AlreadyStarted,
}

impl From<SchedulerError> for BlueGreenError {
    fn from(value: SchedulerError) -> Self {
        let kind = match &value {
            SchedulerError::InvalidConfig(_) | SchedulerError::AlreadyStarted => {
                ErrorKind::ConfigValidation
            }
            SchedulerError::DataPathNotFound(_) => ErrorKind::DataPathNotFound,
            SchedulerError::TargetUnreachable(err) => err.kind,
        };
        BlueGreenError::new(kind).with_hint(value.to_string())
    }
}
