//! Per-page session shared by both facades: request correlation, the state
//! cache and background health.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use pali_inpage_core::{
    ChainFamily, ClockPort, FrameKind, PortError, ProviderRpcError, RequestFrame, RequestPayload,
    ResponseDetail, RpcReply, TimestampMs, Transport,
};

use crate::cache::StateCache;
use crate::config::{EVM_STATE_METHOD, UTXO_STATE_METHOD};
use crate::BridgeConfig;

pub struct ProviderSession {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn ClockPort>,
    cache: Mutex<StateCache>,
    pending: Mutex<HashMap<String, oneshot::Sender<ResponseDetail>>>,
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl ProviderSession {
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        let cache = StateCache::new(&config);
        Self {
            config,
            transport,
            clock,
            cache: Mutex::new(cache),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn now(&self) -> Result<TimestampMs, PortError> {
        self.clock.now_ms().map(TimestampMs)
    }

    fn cache(&self) -> Result<MutexGuard<'_, StateCache>, PortError> {
        self.cache
            .lock()
            .map_err(|e| PortError::State(format!("state cache lock poisoned: {e}")))
    }

    fn pending(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, oneshot::Sender<ResponseDetail>>>, PortError> {
        self.pending
            .lock()
            .map_err(|e| PortError::State(format!("pending request lock poisoned: {e}")))
    }

    pub fn pending_count(&self) -> usize {
        self.pending().map(|g| g.len()).unwrap_or(0)
    }

    pub fn invalidate_all(&self) -> Result<(), PortError> {
        self.cache()?.invalidate_all();
        debug!("state cache invalidated");
        Ok(())
    }

    pub fn cached_provider_state(&self, method: &str) -> Result<Option<Value>, PortError> {
        let now = self.now()?;
        Ok(self.cache()?.provider_state(method, now))
    }

    pub fn cached_network_type(&self) -> Result<Option<bool>, PortError> {
        let now = self.now()?;
        Ok(self.cache()?.network_type(now))
    }

    pub fn record_network_type(&self, is_bitcoin_based: bool) -> Result<(), PortError> {
        let now = self.now()?;
        self.cache()?.put_network_type(is_bitcoin_based, now);
        Ok(())
    }

    pub fn is_connected_to_background(&self) -> bool {
        self.cache()
            .map(|c| c.is_connected_to_background())
            .unwrap_or(false)
    }

    /// Posts one frame and waits for the response addressed to its id.
    ///
    /// No timeout: the call waits until the wallet answers or the session
    /// is dropped.
    pub async fn send(
        &self,
        kind: FrameKind,
        payload: RequestPayload,
    ) -> Result<RpcReply, ProviderRpcError> {
        let now = self.now()?;
        let cacheable = self.config.is_cached_method(&payload.method);
        if cacheable {
            if let Some(hit) = self.cache()?.provider_state(&payload.method, now) {
                debug!(method = %payload.method, "provider state served from cache");
                return Ok(RpcReply::Payload(hit));
            }
        }
        if self.cache()?.should_fail_fast(now) {
            debug!(method = %payload.method, "background unavailable, failing fast");
            return Err(ProviderRpcError::background_unavailable());
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.pending()?;
            let mut id = next_request_id(now)?;
            while pending.contains_key(&id) {
                id = next_request_id(now)?;
            }
            pending.insert(id.clone(), tx);
            id
        };
        let method = payload.method.clone();
        let frame = RequestFrame {
            id: id.clone(),
            kind,
            data: payload,
        };
        if let Err(e) = self.transport.post(&frame) {
            self.pending()?.remove(&id);
            warn!(%method, "failed to post request frame: {e}");
            return Err(e.into());
        }

        let detail = rx
            .await
            .map_err(|_| ProviderRpcError::internal("response listener dropped before reply"))?;
        self.settle(&method, cacheable, detail)
    }

    /// Hands an inbound response to the call waiting on `id`. Unknown ids
    /// are dropped.
    pub fn deliver_response(&self, id: &str, detail: ResponseDetail) {
        let sender = match self.pending() {
            Ok(mut pending) => pending.remove(id),
            Err(e) => {
                warn!(%id, "cannot route response: {e}");
                return;
            }
        };
        match sender {
            Some(tx) => {
                if tx.send(detail).is_err() {
                    debug!(%id, "caller stopped waiting for response");
                }
            }
            None => debug!(%id, "response without pending request"),
        }
    }

    fn settle(
        &self,
        method: &str,
        cacheable: bool,
        detail: ResponseDetail,
    ) -> Result<RpcReply, ProviderRpcError> {
        let raw = match detail {
            ResponseDetail::Undefined => return Ok(RpcReply::Undefined),
            ResponseDetail::Null => return Ok(RpcReply::Null),
            ResponseDetail::Json(raw) => raw,
        };
        let payload: Value = serde_json::from_str(&raw).map_err(|e| {
            warn!(%method, "unparsable response: {e}");
            ProviderRpcError::parse(format!("Failed to parse response: {e}"))
        })?;

        let now = self.now()?;
        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            let err = ProviderRpcError::from_payload(error);
            if self.config.is_background_unavailable(&err.message) {
                warn!(%method, "wallet background unreachable: {}", err.message);
                self.cache()?.record_background_failure(now);
            }
            return Err(err);
        }

        let mut cache = self.cache()?;
        cache.record_background_success();
        if cacheable {
            cache.put_provider_state(method, payload.clone(), now);
        }
        Ok(RpcReply::Payload(payload))
    }

    /// Decides whether the active chain is bitcoin-based. Tries the UTXO
    /// state query, then the EVM one, then falls back to the asking facade's
    /// default. Whatever is decided is cached.
    pub async fn resolve_network_type(&self, asking: ChainFamily) -> bool {
        match self.cached_network_type() {
            Ok(Some(cached)) => return cached,
            Ok(None) => {}
            Err(e) => warn!("network type cache unavailable: {e}"),
        }

        for method in [UTXO_STATE_METHOD, EVM_STATE_METHOD] {
            match self
                .send(FrameKind::MethodRequest, RequestPayload::new(method))
                .await
            {
                Ok(reply) => match bitcoin_flag(&reply) {
                    Some(flag) => {
                        self.store_network_type(flag);
                        return flag;
                    }
                    None => debug!(%method, "state reply carries no isBitcoinBased flag"),
                },
                Err(e) => debug!(%method, "network type query failed: {e}"),
            }
        }

        let fallback = asking == ChainFamily::Utxo;
        warn!(?asking, fallback, "could not determine network type, using default");
        self.store_network_type(fallback);
        fallback
    }

    fn store_network_type(&self, flag: bool) {
        if let Err(e) = self.record_network_type(flag) {
            warn!("failed to cache network type: {e}");
        }
    }
}

fn bitcoin_flag(reply: &RpcReply) -> Option<bool> {
    let payload = reply.payload()?;
    payload
        .get("result")
        .and_then(|r| r.get("isBitcoinBased"))
        .or_else(|| payload.get("isBitcoinBased"))
        .and_then(Value::as_bool)
}

/// `<epoch ms>.<random fraction>`, the same shape the page-side script has
/// always used for event names.
fn next_request_id(now: TimestampMs) -> Result<String, PortError> {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf)
        .map_err(|e| PortError::Transport(format!("random source unavailable: {e}")))?;
    let fraction = (u64::from_le_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64;
    Ok(format!("{}.{}", now.0, fraction))
}
