//! Undertow Core - Session lifecycle for on-demand torrent media access
//!
//! This crate provides the building blocks shared by the server and the
//! simulated engine: content identifiers, the transfer engine abstraction,
//! the session registry, configuration, and tracing setup.

pub mod config;
pub mod engine;
pub mod identifier;
pub mod session;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use engine::{
    ByteRange, EngineError, FileRef, FileStream, Readiness, SharedHandle, TransferEngine,
    TransferHandle,
};
pub use identifier::{ContentId, ContentSource, IdentifierError};
pub use session::{Acquisition, Session, SessionError, SessionRegistry, SessionState};

/// Core errors that can bubble up from any Undertow subsystem.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UndertowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UndertowError::Session(e) => match e {
                SessionError::InvalidInput(reason) => format!("Invalid torrent reference: {reason}"),
                SessionError::AcquisitionTimeout { .. } => {
                    "Timed out waiting for torrent metadata".to_string()
                }
                SessionError::AcquisitionFailed { reason, .. } => {
                    format!("Could not start torrent: {reason}")
                }
                _ => "Session error occurred".to_string(),
            },
            UndertowError::Engine(_) => "Engine error occurred".to_string(),
            UndertowError::Configuration { reason } => format!("Configuration error: {reason}"),
            UndertowError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        match self {
            UndertowError::Session(e) => e.is_user_error(),
            UndertowError::Configuration { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, UndertowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_are_classified() {
        let invalid: UndertowError = SessionError::InvalidInput(IdentifierError::Empty).into();
        assert!(invalid.is_user_error());
        assert!(invalid.user_message().starts_with("Invalid torrent reference"));

        let io: UndertowError = std::io::Error::other("disk").into();
        assert!(!io.is_user_error());
        assert_eq!(io.user_message(), "File system error occurred");
    }
}
