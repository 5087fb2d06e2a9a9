use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use ts_rs::TS;

/// Structured error type for the bridge. Every failure the core can surface
/// maps onto one of these so the transport can render a consistent body.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error(
        "Command name conflict: '{name}' is defined in both '{existing_module}' and \
         '{new_module}'. Command names must be unique across all modules."
    )]
    NameConflict {
        name: String,
        existing_module: String,
        new_module: String,
    },
    #[error("Command '{name}' not found")]
    CommandNotFound { name: String },
    #[error("Channel '{id}' not found")]
    ChannelNotFound { id: String },
    #[error("Model '{name}' is referenced but was never registered")]
    ModelNotFound { name: String },
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },
    #[error("{message}")]
    CommandExecution { message: String },
    #[error("{message}")]
    Channel { message: String },
    #[error("{message}")]
    Internal { message: String },
}

impl BridgeError {
    pub fn validation(message: impl Into<String>) -> Self {
        BridgeError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        BridgeError::Internal {
            message: message.into(),
        }
    }

    /// Wire code carried in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::NameConflict { .. } => "NAME_CONFLICT",
            BridgeError::CommandNotFound { .. } => "COMMAND_NOT_FOUND",
            BridgeError::ChannelNotFound { .. } => "CHANNEL_NOT_FOUND",
            BridgeError::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            BridgeError::Validation { .. } => "VALIDATION_ERROR",
            BridgeError::CommandExecution { .. } => "COMMAND_EXECUTION_ERROR",
            BridgeError::Channel { .. } => "CHANNEL_ERROR",
            BridgeError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// HTTP-style status class for the transport.
    pub fn status(&self) -> u16 {
        match self {
            BridgeError::CommandNotFound { .. } | BridgeError::ChannelNotFound { .. } => 404,
            BridgeError::Internal { .. } | BridgeError::ModelNotFound { .. } => 500,
            BridgeError::NameConflict { .. }
            | BridgeError::Validation { .. }
            | BridgeError::CommandExecution { .. }
            | BridgeError::Channel { .. } => 400,
        }
    }

    /// Render the error for the wire. Internal faults keep their text only
    /// when `debug` is set.
    pub fn to_body(&self, debug: bool) -> ErrorBody {
        let message = match self {
            BridgeError::Internal { .. } if !debug => "An internal error occurred".to_string(),
            other => other.to_string(),
        };
        let details = match self {
            BridgeError::Validation { details, .. } => details.clone(),
            _ => None,
        };
        ErrorBody {
            code: self.code().to_string(),
            message,
            details,
        }
    }
}

/// Error body returned by every failing request and carried by `error` frames.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize, TS)]
#[ts(export)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub details: Option<Value>,
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::validation(e.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::internal(format!("I/O error: {e}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn name_conflict_names_both_modules() {
        let err = BridgeError::NameConflict {
            name: "get_user".into(),
            existing_module: "users".into(),
            new_module: "admin".into(),
        };
        let text = err.to_string();
        assert!(text.contains("'users'"));
        assert!(text.contains("'admin'"));
        assert_eq!(err.code(), "NAME_CONFLICT");
    }

    #[test]
    fn status_classes() {
        assert_eq!(BridgeError::CommandNotFound { name: "x".into() }.status(), 404);
        assert_eq!(BridgeError::ChannelNotFound { id: "x".into() }.status(), 404);
        assert_eq!(BridgeError::validation("bad").status(), 400);
        assert_eq!(
            BridgeError::CommandExecution { message: "boom".into() }.status(),
            400
        );
        assert_eq!(BridgeError::internal("oops").status(), 500);
    }

    #[test]
    fn internal_text_hidden_without_debug() {
        let err = BridgeError::internal("secret stack trace");
        assert_eq!(err.to_body(false).message, "An internal error occurred");
        assert_eq!(err.to_body(true).message, "secret stack trace");
        // Non-internal messages are always passed through.
        let err = BridgeError::CommandExecution { message: "boom".into() };
        assert_eq!(err.to_body(false).message, "boom");
    }

    #[test]
    fn body_omits_absent_details() {
        let body = BridgeError::validation("bad").to_body(false);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"code": "VALIDATION_ERROR", "message": "bad"})
        );
    }
}
