use std::collections::HashMap;

use serde_json::Value;

use pali_inpage_core::TimestampMs;

use crate::BridgeConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry<T> {
    pub data: T,
    pub timestamp: TimestampMs,
    pub is_valid: bool,
}

impl<T: Clone> CachedEntry<T> {
    fn new(data: T, now: TimestampMs) -> Self {
        Self {
            data,
            timestamp: now,
            is_valid: true,
        }
    }

    fn fresh(&self, now: TimestampMs, ttl_ms: u64) -> Option<T> {
        (self.is_valid && now.elapsed_since(self.timestamp) < ttl_ms).then(|| self.data.clone())
    }
}

/// Page-lifetime cache of wallet state plus the background health flag.
#[derive(Debug, Clone)]
pub struct StateCache {
    network_type_ttl_ms: u64,
    provider_state_ttl_ms: u64,
    connection_error_ttl_ms: u64,
    network_type: Option<CachedEntry<bool>>,
    provider_state: HashMap<String, CachedEntry<Value>>,
    connected_to_background: bool,
    last_connection_error: Option<TimestampMs>,
}

impl StateCache {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            network_type_ttl_ms: config.network_type_cache_ttl_ms,
            provider_state_ttl_ms: config.provider_state_cache_ttl_ms,
            connection_error_ttl_ms: config.connection_error_ttl_ms,
            network_type: None,
            provider_state: HashMap::new(),
            connected_to_background: true,
            last_connection_error: None,
        }
    }

    pub fn network_type(&self, now: TimestampMs) -> Option<bool> {
        self.network_type
            .as_ref()
            .and_then(|e| e.fresh(now, self.network_type_ttl_ms))
    }

    pub fn put_network_type(&mut self, is_bitcoin_based: bool, now: TimestampMs) {
        self.network_type = Some(CachedEntry::new(is_bitcoin_based, now));
    }

    pub fn provider_state(&self, method: &str, now: TimestampMs) -> Option<Value> {
        self.provider_state
            .get(method)
            .and_then(|e| e.fresh(now, self.provider_state_ttl_ms))
    }

    pub fn put_provider_state(&mut self, method: &str, payload: Value, now: TimestampMs) {
        self.provider_state
            .insert(method.to_owned(), CachedEntry::new(payload, now));
    }

    /// Marks every entry stale. Stale entries stay in place until
    /// overwritten and are never served.
    pub fn invalidate_all(&mut self) {
        if let Some(entry) = self.network_type.as_mut() {
            entry.is_valid = false;
        }
        for entry in self.provider_state.values_mut() {
            entry.is_valid = false;
        }
    }

    pub fn record_background_failure(&mut self, now: TimestampMs) {
        self.connected_to_background = false;
        self.last_connection_error = Some(now);
    }

    pub fn record_background_success(&mut self) {
        self.connected_to_background = true;
        self.last_connection_error = None;
    }

    pub fn is_connected_to_background(&self) -> bool {
        self.connected_to_background
    }

    /// True while a recent background failure should short-circuit calls.
    pub fn should_fail_fast(&self, now: TimestampMs) -> bool {
        if self.connected_to_background {
            return false;
        }
        self.last_connection_error
            .map(|at| now.elapsed_since(at) < self.connection_error_ttl_ms)
            .unwrap_or(false)
    }
}
