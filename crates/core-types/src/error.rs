use std::fmt;

use thiserror::Error;

/// Error categories shared by every orchestrator crate.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("internal error")]
    Internal,
    #[error("unknown error")]
    Unknown,
    #[error("protocol state violation")]
    ProtocolState,
    #[error("health gate rejected")]
    HealthGate,
    #[error("data path not found")]
    DataPathNotFound,
    #[error("invalid configuration")]
    ConfigValidation,
    #[error("transport failure")]
    Transport,
    #[error("timed out")]
    Timeout,
}

/// Error with its category and a human-readable hint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlueGreenError {
    pub kind: ErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
}

impl fmt::Display for BlueGreenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for BlueGreenError {}

impl BlueGreenError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    /// Prefix the hint with `context`.
    pub fn context(mut self, context: impl std::fmt::Display) -> Self {
        self.hint = Some(match self.hint.take() {
            Some(hint) => format!("{context}: {hint}"),
            None => context.to_string(),
        });
        self
    }

    pub fn not_found(hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound).with_hint(hint)
    }

    pub fn protocol_state(hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolState).with_hint(hint)
    }

    pub fn transport(hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport)
            .with_hint(hint)
            .retriable(true)
    }

    /// Classify a raw message reported by the target system.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = interpret(&message).unwrap_or(ErrorKind::Transport);
        Self::new(kind)
            .with_hint(message)
            .retriable(!matches!(kind, ErrorKind::InvalidArgument))
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

impl From<std::io::Error> for BlueGreenError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::DataPathNotFound,
            _ => ErrorKind::Internal,
        };
        Self::new(kind).with_hint(err.to_string())
    }
}

/// Map a target-system message onto the taxonomy.
///
/// Returns `None` for messages that carry none of the known category markers.
pub fn interpret(message: &str) -> Option<ErrorKind> {
    let lowered = message.to_ascii_lowercase();
    if message.contains("NOT_FOUND")
        || (lowered.contains("not found") && lowered.contains("arrow process"))
    {
        return Some(ErrorKind::NotFound);
    }
    if message.contains("ALREADY_EXISTS") {
        return Some(ErrorKind::AlreadyExists);
    }
    if message.contains("INVALID_ARGUMENT") {
        return Some(ErrorKind::InvalidArgument);
    }
    if message.contains("INTERNAL") {
        return Some(ErrorKind::Internal);
    }
    if message.contains("UNKNOWN") {
        return Some(ErrorKind::Unknown);
    }
    None
}
