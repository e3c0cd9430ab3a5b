use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampMs(pub u64);

impl TimestampMs {
    pub fn elapsed_since(self, earlier: TimestampMs) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Which chain family a facade speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainFamily {
    Evm,
    Utxo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    #[serde(rename = "METHOD_REQUEST")]
    MethodRequest,
    #[serde(rename = "ENABLE")]
    Enable,
    #[serde(rename = "DISABLE")]
    Disable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestPayload {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params: Some(params),
        }
    }
}

/// Outbound frame posted to the page window. The `id` doubles as the name of
/// the event carrying the matching response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub data: RequestPayload,
}

/// `detail` of an inbound response event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseDetail {
    Undefined,
    Null,
    Json(String),
}

/// Settled outcome of a successful round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcReply {
    Undefined,
    Null,
    Payload(Value),
}

impl RpcReply {
    pub fn payload(&self) -> Option<&Value> {
        match self {
            RpcReply::Payload(value) => Some(value),
            RpcReply::Undefined | RpcReply::Null => None,
        }
    }

    /// Unwraps `.result` unless the payload is batch-shaped.
    pub fn into_result(self) -> Value {
        match self {
            RpcReply::Undefined | RpcReply::Null => Value::Null,
            RpcReply::Payload(Value::Array(items)) => Value::Array(items),
            RpcReply::Payload(mut payload) => payload
                .get_mut("result")
                .map(Value::take)
                .unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationChannel {
    Evm,
    Utxo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Messages the transport hands back to the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Response { id: String, detail: ResponseDetail },
    Notification { channel: NotificationChannel, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmProviderState {
    pub accounts: Option<Vec<String>>,
    pub chain_id: Option<String>,
    pub network_version: Option<String>,
    pub selected_address: Option<String>,
    pub is_bitcoin_based: bool,
    pub is_connected: bool,
    pub is_unlocked: bool,
    pub initialized: bool,
    pub is_permanently_disconnected: bool,
    pub is_exposed: bool,
}

impl Default for EvmProviderState {
    fn default() -> Self {
        Self {
            accounts: None,
            chain_id: None,
            network_version: None,
            selected_address: None,
            is_bitcoin_based: false,
            is_connected: false,
            is_unlocked: false,
            initialized: false,
            is_permanently_disconnected: false,
            is_exposed: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoProviderState {
    pub xpub: Option<String>,
    #[serde(rename = "blockExplorerURL")]
    pub block_explorer_url: Option<String>,
    pub is_unlocked: bool,
    pub initialized: bool,
    /// Set by a recoverable disconnect, cleared by the next wallet push.
    #[serde(default)]
    pub is_disconnected: bool,
    pub is_permanently_disconnected: bool,
}

/// Raw `wallet_getProviderState` result. Fields stay loosely typed so the
/// facade can run its own validation on them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialEvmState {
    #[serde(default)]
    pub accounts: Value,
    #[serde(default)]
    pub chain_id: Value,
    #[serde(default)]
    pub network_version: Value,
    #[serde(default)]
    pub is_unlocked: Value,
    #[serde(default)]
    pub is_bitcoin_based: Option<bool>,
}

/// Raw `wallet_getSysProviderState` result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialUtxoState {
    #[serde(default)]
    pub xpub: Option<String>,
    #[serde(default, rename = "blockExplorerURL")]
    pub block_explorer_url: Option<String>,
    #[serde(default)]
    pub is_unlocked: Value,
    #[serde(default)]
    pub is_bitcoin_based: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    pub icon: String,
    pub rdns: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub id: Value,
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Value,
    pub jsonrpc: String,
    pub result: Value,
}

fn default_jsonrpc() -> String {
    "2.0".to_owned()
}
