use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ports::PortError;

pub mod codes {
    pub const INVALID_REQUEST_ARGS: i64 = 1;
    pub const INVALID_REQUEST_METHOD: i64 = 2;
    pub const INVALID_REQUEST_PARAMS: i64 = 3;
    pub const INVALID_BATCH_REQUEST: i64 = 4;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const PERMANENT_DISCONNECT: i64 = 1011;
    pub const RECOVERABLE_DISCONNECT: i64 = 1013;
    pub const INTERNAL: i64 = -32603;
    pub const PARSE: i64 = -32700;
}

pub const BACKGROUND_UNAVAILABLE_MESSAGE: &str =
    "Wallet background is temporarily unavailable. Please try again shortly.";

/// Caller-facing error: what a dApp receives when a call rejects or a
/// `disconnect` event fires.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProviderRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(codes::PARSE, message)
    }

    pub fn background_unavailable() -> Self {
        Self::new(codes::INTERNAL, BACKGROUND_UNAVAILABLE_MESSAGE)
    }

    pub fn invalid_request_args() -> Self {
        Self::new(
            codes::INVALID_REQUEST_ARGS,
            "Expected a single, non-array, object argument.",
        )
    }

    pub fn invalid_request_method() -> Self {
        Self::new(
            codes::INVALID_REQUEST_METHOD,
            "'args.method' must be a non-empty string.",
        )
    }

    pub fn invalid_request_params() -> Self {
        Self::new(
            codes::INVALID_REQUEST_PARAMS,
            "'args.params' must be an object or array if provided.",
        )
    }

    pub fn invalid_batch_request() -> Self {
        Self::new(
            codes::INVALID_BATCH_REQUEST,
            "Batched requests are not supported by this provider.",
        )
    }

    pub fn unsupported_sync_method(method: &str) -> Self {
        Self::new(
            codes::UNSUPPORTED_METHOD,
            format!("The provider does not support the synchronous method \"{method}\"."),
        )
    }

    pub fn disconnected() -> Self {
        Self::new(
            codes::DISCONNECTED,
            "The provider is permanently disconnected from the wallet. Reload the page.",
        )
    }

    pub fn recoverable_disconnect(message: Option<&str>) -> Self {
        Self::new(
            codes::RECOVERABLE_DISCONNECT,
            message.unwrap_or("Disconnected from the wallet. Attempting to connect."),
        )
    }

    pub fn permanent_disconnect(message: Option<&str>) -> Self {
        Self::new(
            codes::PERMANENT_DISCONNECT,
            message.unwrap_or("Disconnected from the wallet. Page reload required."),
        )
    }

    /// Decodes the `error` member of a response payload. Anything that is not
    /// a `{code, message}` object still rejects, as an internal error.
    pub fn from_payload(error: &Value) -> Self {
        serde_json::from_value::<ProviderRpcError>(error.clone()).unwrap_or_else(|_| {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            Self::internal(message).with_data(error.clone())
        })
    }
}

impl From<PortError> for ProviderRpcError {
    fn from(err: PortError) -> Self {
        Self::internal(err.to_string())
    }
}

/// Failures surfaced by the notification router. There is no caller to
/// reject to, so these are logged by whoever drives the router.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("malformed notification: {0}")]
    Malformed(String),
    #[error("notification method not yet supported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Port(#[from] PortError),
    #[error(transparent)]
    Rpc(#[from] ProviderRpcError),
}
