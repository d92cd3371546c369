use bluegreen_core_types::{BlueGreenError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{code}: {message}")]
    Statement { code: String, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ControlPlaneError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlPlaneError::Request(err) if err.is_timeout() => ErrorKind::Timeout,
            ControlPlaneError::Request(_) => ErrorKind::Transport,
            ControlPlaneError::Statement { code, message } => classify_status(code, message),
            ControlPlaneError::Decode(_) => ErrorKind::Internal,
        }
    }
}

impl From<ControlPlaneError> for BlueGreenError {
    fn from(value: ControlPlaneError) -> Self {
        let kind = value.kind();
        let retriable = matches!(kind, ErrorKind::Transport | ErrorKind::Timeout)
            || matches!(&value, ControlPlaneError::Statement { code, .. } if code.contains("TransientError"));
        BlueGreenError::new(kind)
            .with_hint(value.to_string())
            .retriable(retriable)
    }
}

/// Map a status code such as `Neo.ClientError.Database.DatabaseNotFound` onto the taxonomy.
fn classify_status(code: &str, message: &str) -> ErrorKind {
    let lowered = message.to_ascii_lowercase();
    if code.ends_with("NotFound") || lowered.contains("does not exist") {
        ErrorKind::NotFound
    } else if code.ends_with("ExistingDatabaseFound")
        || code.ends_with("ExistingAliasFound")
        || lowered.contains("already exists")
    {
        ErrorKind::AlreadyExists
    } else if code.contains("ClientError.Statement") || code.contains("ClientError.Security") {
        ErrorKind::InvalidArgument
    } else if code.contains("TransientError") {
        ErrorKind::Transport
    } else {
        ErrorKind::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(code: &str, message: &str) -> BlueGreenError {
        ControlPlaneError::Statement {
            code: code.into(),
            message: message.into(),
        }
        .into()
    }

    #[test]
    fn statement_codes_map_to_kinds() {
        assert_eq!(
            statement("Neo.ClientError.Database.DatabaseNotFound", "gone").kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            statement(
                "Neo.ClientError.Statement.ArgumentError",
                "Failed to delete the specified database alias 'acme': Database alias does not exist."
            )
            .kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            statement("Neo.ClientError.Database.ExistingDatabaseFound", "dup").kind,
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            statement("Neo.ClientError.Statement.SyntaxError", "bad").kind,
            ErrorKind::InvalidArgument
        );
        let transient = statement("Neo.TransientError.General.DatabaseUnavailable", "busy");
        assert_eq!(transient.kind, ErrorKind::Transport);
        assert!(transient.retriable);
        assert_eq!(
            statement("Neo.DatabaseError.General.UnknownError", "boom").kind,
            ErrorKind::Internal
        );
    }
}
