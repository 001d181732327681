//! Bridge errors

use crate::host::ServiceName;
use crate::ContextId;

/// Bridge result type
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Script-visible error class a [`BridgeError`] surfaces as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Reference,
    Type,
    Range,
    Internal,
}

/// Bridge errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to execute '{operation}' on 'Performance': The mark {mark} does not exist.")]
    MarkNotFound { operation: &'static str, mark: String },

    #[error("{0}")]
    TypeError(String),

    #[error("{0}")]
    RangeError(String),

    #[error("execution context {0} has been disposed")]
    ContextDisposed(ContextId),

    #[error("execution context limit of {0} reached")]
    ContextLimit(usize),

    #[error("cannot register host service '{0}' after the host thread was captured")]
    RegistrationClosed(ServiceName),

    #[error("host thread already captured")]
    AlreadyCaptured,

    #[error("invalid bridge config: {0}")]
    Config(#[from] serde_json::Error),
}

impl BridgeError {
    /// Error class used when the error is rethrown into script
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::MarkNotFound { .. } => ErrorKind::Reference,
            BridgeError::TypeError(_) | BridgeError::Config(_) => ErrorKind::Type,
            BridgeError::RangeError(_) | BridgeError::ContextLimit(_) => ErrorKind::Range,
            BridgeError::ContextDisposed(_)
            | BridgeError::RegistrationClosed(_)
            | BridgeError::AlreadyCaptured => ErrorKind::Internal,
        }
    }

    /// Argument-count failure in the style script engines report it
    pub fn missing_argument(operation: &str, interface: &str) -> Self {
        BridgeError::TypeError(format!(
            "Failed to execute '{operation}' on '{interface}': 1 argument required, but only 0 present."
        ))
    }
}

/// An exception raised by script code while the bridge was calling into it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptException {
    pub message: String,
}

impl ScriptException {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
