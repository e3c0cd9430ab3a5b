//! Shape checks for caller input and pushed wallet state.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::domain::RequestPayload;
use crate::error::ProviderRpcError;

static CHAIN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]+$").expect("valid built-in chain id pattern"));

/// Validated `request()` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestArguments {
    pub method: String,
    pub params: Option<Value>,
}

impl RequestArguments {
    pub fn from_value(args: &Value) -> Result<Self, ProviderRpcError> {
        let obj = args
            .as_object()
            .ok_or_else(ProviderRpcError::invalid_request_args)?;
        Self::from_object(obj)
    }

    fn from_object(obj: &Map<String, Value>) -> Result<Self, ProviderRpcError> {
        let method = match obj.get("method") {
            Some(Value::String(m)) if !m.is_empty() => m.clone(),
            _ => return Err(ProviderRpcError::invalid_request_method()),
        };
        let params = match obj.get("params") {
            None => None,
            Some(p @ (Value::Array(_) | Value::Object(_))) => Some(p.clone()),
            Some(_) => return Err(ProviderRpcError::invalid_request_params()),
        };
        Ok(Self { method, params })
    }

    pub fn into_payload(self) -> RequestPayload {
        RequestPayload {
            method: self.method,
            params: self.params,
        }
    }
}

pub fn is_valid_chain_id(chain_id: &str) -> bool {
    CHAIN_ID_RE.is_match(chain_id)
}

/// Accepts a non-empty string or a non-negative integer and returns the
/// canonical string form.
pub fn normalize_network_version(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => n.as_u64().map(|v| v.to_string()),
        _ => None,
    }
}

/// `0x` followed by at least one hex digit. Length is not checked.
pub fn is_hex_address(candidate: &str) -> bool {
    candidate
        .strip_prefix("0x")
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Normalizes a pushed accounts list. Returns the list plus whether the input
/// had to be rejected wholesale; null entries are dropped.
pub fn normalize_accounts(value: &Value) -> (Vec<String>, bool) {
    let Some(items) = value.as_array() else {
        return (Vec::new(), true);
    };
    let mut accounts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(account) => accounts.push(account.clone()),
            Value::Null => {}
            _ => return (Vec::new(), true),
        }
    }
    (accounts, false)
}

pub fn first_hex_account(accounts: &[String]) -> Option<String> {
    accounts.iter().find(|a| is_hex_address(a)).cloned()
}
