//! Error types for the postmsg protocol.
//!
//! - [`OriginError`]: an origin filter could not be built from a URL
//! - [`EnvelopeError`]: an inbound payload is not a protocol message
//! - [`RpcError`]: returned by method handlers, carried back as a rejection
//! - [`CallError`]: what a calling client observes when a call does not resolve
//!
//! Rejections cross the boundary as plain JSON values, never as structured
//! error objects. [`RpcError::to_wire_error`] performs that flattening.

use serde_json::Value;
use thiserror::Error;

// ── Error code constants ────────────────────────────────────────────

/// Method not found in the registry.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Arguments did not have the expected shape.
pub const INVALID_ARGS: &str = "INVALID_ARGS";
/// Handler failed while running.
pub const HANDLER_FAILED: &str = "HANDLER_FAILED";
/// Handler rejected with an arbitrary value.
pub const REJECTED: &str = "REJECTED";

/// Failure to derive an origin filter from a URL.
#[derive(Debug, Error)]
pub enum OriginError {
    /// The URL could not be parsed.
    #[error("invalid origin URL {url:?}: {source}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },

    /// The URL parsed but has an opaque origin (e.g. `data:`).
    #[error("URL {url:?} has an opaque origin")]
    Opaque {
        /// The offending input.
        url: String,
    },
}

/// An inbound payload that is not a protocol message.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Object payload with missing or mistyped fields.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Payload of a JSON kind the protocol never sends.
    #[error("unrecognized {kind} payload")]
    Unrecognized {
        /// JSON kind of the payload.
        kind: &'static str,
    },
}

/// Error type returned by method handlers.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No handler is registered under the requested name.
    #[error("Function not found: {method}")]
    MethodNotFound {
        /// Requested method name.
        method: String,
    },

    /// Arguments were missing or of the wrong type.
    #[error("{message}")]
    InvalidArgs {
        /// Description of what is wrong.
        message: String,
    },

    /// The handler failed.
    #[error("{message}")]
    Failed {
        /// Description.
        message: String,
    },

    /// Reject with an arbitrary value, sent to the caller untouched.
    #[error("{0}")]
    Value(Value),
}

impl RpcError {
    /// Machine-readable code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidArgs { .. } => INVALID_ARGS,
            Self::Failed { .. } => HANDLER_FAILED,
            Self::Value(_) => REJECTED,
        }
    }

    /// The rejection value placed in a reply's `error` field.
    ///
    /// String variants become plain JSON strings; [`RpcError::Value`] is
    /// passed through as is.
    pub fn to_wire_error(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            other => Value::String(other.to_string()),
        }
    }
}

/// Why a client call did not resolve with a value.
#[derive(Debug, Error)]
pub enum CallError {
    /// No target window has been bound yet; nothing was sent.
    #[error("cannot call {method}: target window is not initialized")]
    NotInitialized {
        /// Requested method name.
        method: String,
    },

    /// The peer settled the call as rejected.
    #[error("call to {method} was rejected: {error}")]
    Rejected {
        /// Requested method name.
        method: String,
        /// Raw rejection value from the peer.
        error: Value,
    },

    /// No reply arrived within the configured timeout.
    #[error("call to {method} timed out after {timeout_ms}ms")]
    TimedOut {
        /// Requested method name.
        method: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The client was closed before a reply arrived.
    #[error("client closed before {method} settled")]
    Closed {
        /// Requested method name.
        method: String,
    },
}

impl CallError {
    /// The peer's rejection value, if the call was rejected remotely.
    pub fn rejection(&self) -> Option<&Value> {
        match self {
            Self::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Method name the failed call addressed.
    pub fn method(&self) -> &str {
        match self {
            Self::NotInitialized { method }
            | Self::Rejected { method, .. }
            | Self::TimedOut { method, .. }
            | Self::Closed { method } => method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_not_found_names_the_method() {
        let err = RpcError::MethodNotFound {
            method: "missing".into(),
        };
        assert_eq!(err.code(), METHOD_NOT_FOUND);
        let wire = err.to_wire_error();
        assert!(wire.as_str().unwrap().contains("missing"));
    }

    #[test]
    fn string_variants_flatten_to_plain_strings() {
        let err = RpcError::InvalidArgs {
            message: "expected two numbers".into(),
        };
        assert_eq!(err.code(), INVALID_ARGS);
        assert_eq!(err.to_wire_error(), json!("expected two numbers"));

        let err = RpcError::Failed {
            message: "boom".into(),
        };
        assert_eq!(err.code(), HANDLER_FAILED);
        assert_eq!(err.to_wire_error(), json!("boom"));
    }

    #[test]
    fn value_variant_passes_through() {
        let err = RpcError::Value(json!({"reason": "quota", "retryIn": 30}));
        assert_eq!(err.code(), REJECTED);
        assert_eq!(err.to_wire_error()["retryIn"], 30);
    }

    #[test]
    fn call_error_accessors() {
        let err = CallError::Rejected {
            method: "add".into(),
            error: json!("bad"),
        };
        assert_eq!(err.method(), "add");
        assert_eq!(err.rejection(), Some(&json!("bad")));

        let err = CallError::NotInitialized { method: "x".into() };
        assert!(err.rejection().is_none());
        assert!(err.to_string().contains("not initialized"));
    }

    #[test]
    fn timed_out_display() {
        let err = CallError::TimedOut {
            method: "slow".into(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "call to slow timed out after 250ms");
    }

    #[test]
    fn origin_error_display() {
        let err = OriginError::Opaque {
            url: "data:text/plain,hi".into(),
        };
        assert!(err.to_string().contains("opaque"));
    }
}
