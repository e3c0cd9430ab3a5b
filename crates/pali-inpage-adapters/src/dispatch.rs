//! Forwarding plus the legacy `send` / `sendAsync` / `_sendSync`
//! shapes layered on top of the async path.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use pali_inpage_core::{
    BoxFuture, FrameKind, JsonRpcResponse, ProviderRpcError, RequestArguments, RequestPayload,
};

use crate::session::ProviderSession;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    session: Arc<ProviderSession>,
}

impl Dispatcher {
    pub fn new(session: Arc<ProviderSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<ProviderSession> {
        &self.session
    }

    pub async fn forward(
        &self,
        kind: FrameKind,
        payload: RequestPayload,
    ) -> Result<Value, ProviderRpcError> {
        let reply = self.session.send(kind, payload).await?;
        Ok(reply.into_result())
    }
}

/// Splits a `sendAsync(payload, cb)` payload into the request to forward
/// and the envelope ids echoed in the response. Batches are refused outright.
pub fn split_async_payload(
    payload: &Value,
) -> Result<(RequestArguments, Value, String), ProviderRpcError> {
    if payload.is_array() {
        return Err(ProviderRpcError::invalid_batch_request());
    }
    let args = RequestArguments::from_value(payload)?;
    let (id, jsonrpc) = envelope_ids(payload);
    Ok((args, id, jsonrpc))
}

/// How a legacy `send(a, b)` call is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacySendForm {
    /// `send(method, params[])`, answered asynchronously.
    Request { method: String, params: Value },
    /// Anything else without a callback, answered from mirrored state.
    Sync(Value),
}

pub fn classify_legacy_send(method_or_payload: Value, params: Option<Value>) -> LegacySendForm {
    match (method_or_payload, params) {
        (Value::String(method), Some(params @ Value::Array(_))) => {
            LegacySendForm::Request { method, params }
        }
        (payload, _) => LegacySendForm::Sync(payload),
    }
}

/// Outcome of a legacy `send`: either a pending call or an answer computed
/// on the spot.
pub enum LegacySend {
    Pending(BoxFuture<'static, Result<Value, ProviderRpcError>>),
    Sync(JsonRpcResponse),
}

impl std::fmt::Debug for LegacySend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacySend::Pending(_) => f.write_str("LegacySend::Pending(..)"),
            LegacySend::Sync(resp) => f.debug_tuple("LegacySend::Sync").field(resp).finish(),
        }
    }
}

/// Mirrored state the synchronous legacy path is allowed to read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStateView {
    pub selected_address: Option<String>,
    pub network_version: Option<String>,
}

/// `_sendSync`: four legacy methods answered locally, never via transport.
pub fn answer_sync(
    payload: &Value,
    view: &SyncStateView,
) -> Result<JsonRpcResponse, ProviderRpcError> {
    let method = match payload {
        Value::String(method) => method.as_str(),
        other => other.get("method").and_then(Value::as_str).unwrap_or_default(),
    };
    let result = match method {
        "eth_accounts" => Value::Array(
            view.selected_address
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
        "eth_coinbase" => view
            .selected_address
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "eth_uninstallFilter" => Value::Bool(true),
        "net_version" => view
            .network_version
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        other => {
            debug!(method = other, "unsupported synchronous call");
            return Err(ProviderRpcError::unsupported_sync_method(other));
        }
    };
    let (id, jsonrpc) = envelope_ids(payload);
    Ok(JsonRpcResponse {
        id,
        jsonrpc,
        result,
    })
}

fn envelope_ids(payload: &Value) -> (Value, String) {
    let id = payload.get("id").cloned().unwrap_or(Value::Null);
    let jsonrpc = payload
        .get("jsonrpc")
        .and_then(Value::as_str)
        .unwrap_or("2.0")
        .to_owned();
    (id, jsonrpc)
}
