//! Errors
//!
//! Every failure the protocol engine can report to a caller.

use std::io;

use thiserror::Error;

/// Errors raised while talking to the PDA VM or walking the debug model
#[derive(Debug, Error)]
pub enum PdaError {
    /// The transport is gone, all pending and future commands fail with this
    #[error("connection to the PDA VM is closed")]
    ConnectionClosed,

    /// Reply text doesn't have the shape its opcode expects
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// Only returned by `try_send` when a command is already in flight
    #[error("another command is already in flight")]
    Busy,

    /// A model query was made on a thread that isn't suspended, or on a node
    /// fetched before the last suspension
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The VM answered with an error reply
    #[error("command '{opcode}' failed with code {code}: {message}")]
    CommandFailed {
        opcode: String,
        code: i64,
        message: String,
    },

    #[error("timed out waiting for a reply to '{0}'")]
    Timeout(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PdaError {
    /// True when the error means the session can't be used any more
    pub fn is_fatal(&self) -> bool {
        match self {
            PdaError::ConnectionClosed | PdaError::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PdaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_command_failed_message() {
        let err = PdaError::CommandFailed {
            opcode: "var".to_string(),
            code: 2,
            message: "no such variable".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "command 'var' failed with code 2: no such variable"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn check_io_errors_are_fatal() {
        let err = PdaError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(err.is_fatal());
        assert!(PdaError::ConnectionClosed.is_fatal());
        assert!(!PdaError::Busy.is_fatal());
    }
}
