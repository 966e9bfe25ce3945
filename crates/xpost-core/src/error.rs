use std::fmt;

use thiserror::Error;

/// What a request was waiting for when its target window went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    /// The window was already closed when `send` was called.
    BeforeSend,
    /// No acknowledgement had arrived yet.
    BeforeAck,
    /// Acknowledged, still waiting for the response.
    BeforeResponse,
}

impl fmt::Display for WaitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitPhase::BeforeSend => f.write_str("before send"),
            WaitPhase::BeforeAck => f.write_str("before ack"),
            WaitPhase::BeforeResponse => f.write_str("before response"),
        }
    }
}

/// Errors produced by the xpost messaging layer.
#[derive(Debug, Error)]
pub enum XpostError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("no hello received from child window within {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    #[error("domain mismatch: expected {expected}, got {actual}")]
    DomainMismatch { expected: String, actual: String },

    #[error("no ack for message {name} in {origin} in {timeout_ms}ms")]
    AckTimeout {
        name: String,
        origin: String,
        timeout_ms: u64,
    },

    #[error("no response for message {name} in {origin} in {timeout_ms}ms")]
    ResponseTimeout {
        name: String,
        origin: String,
        timeout_ms: u64,
    },

    #[error("window closed {phase} for message {name}")]
    WindowClosed { name: String, phase: WaitPhase },

    #[error("message {name} cancelled")]
    Cancelled { name: String },

    #[error("send request message failed for {name} in {origin}: {reason}")]
    Transport {
        name: String,
        origin: String,
        reason: String,
    },

    #[error("no parent window found")]
    NoParent,

    #[error("remote handler for {name} failed: {message}")]
    Remote { name: String, message: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl XpostError {
    /// Whether this error was raised before anything was handed to the transport
    /// because the request itself was unusable.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            XpostError::Validation(_)
                | XpostError::WindowClosed {
                    phase: WaitPhase::BeforeSend,
                    ..
                }
        )
    }

    /// Whether this error came from the timeout watchdog.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            XpostError::AckTimeout { .. }
                | XpostError::ResponseTimeout { .. }
                | XpostError::HandshakeTimeout { .. }
        )
    }
}

impl From<ciborium::de::Error<std::io::Error>> for XpostError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        XpostError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for XpostError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        XpostError::Codec(e.to_string())
    }
}

pub type XpostResult<T> = Result<T, XpostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_closed_message_carries_phase() {
        let err = XpostError::WindowClosed {
            name: "getUser".into(),
            phase: WaitPhase::BeforeResponse,
        };
        assert_eq!(err.to_string(), "window closed before response for message getUser");
        assert!(!err.is_validation());
    }

    #[test]
    fn closed_before_send_is_validation() {
        let err = XpostError::WindowClosed {
            name: "x".into(),
            phase: WaitPhase::BeforeSend,
        };
        assert!(err.is_validation());
        assert!(XpostError::Validation("bad".into()).is_validation());
    }

    #[test]
    fn timeouts_are_classified() {
        let err = XpostError::AckTimeout {
            name: "m".into(),
            origin: "https://a.com".into(),
            timeout_ms: 1500,
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("1500ms"));
        assert!(!XpostError::NoParent.is_timeout());
    }
}
