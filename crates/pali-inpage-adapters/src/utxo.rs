//! UTXO-family facade. Identity is the extended public key rather than an
//! address list.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, error, warn};

use pali_inpage_core::{
    derive_utxo_lifecycle, ChainFamily, EventBus, FrameKind, InitialUtxoState, ListenerId,
    PortError, ProviderRpcError, RequestArguments, RequestPayload, Spawner, UtxoEvent,
    UtxoEventName, UtxoLifecycle, UtxoProviderState,
};

use crate::config::UTXO_STATE_METHOD;
use crate::dispatch::Dispatcher;
use crate::session::ProviderSession;

const MINTED_TOKENS_METHOD: &str = "sys_getUserMintedTokens";
const ASSET_METHOD: &str = "sys_getAsset";

pub struct UtxoFacade {
    dispatcher: Dispatcher,
    spawner: Arc<dyn Spawner>,
    state: Mutex<UtxoProviderState>,
    events: EventBus<UtxoEvent>,
    init: OnceCell<()>,
    initialized_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for UtxoFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtxoFacade")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl UtxoFacade {
    pub fn new(session: Arc<ProviderSession>, spawner: Arc<dyn Spawner>) -> Arc<Self> {
        let (initialized_tx, _) = watch::channel(false);
        Arc::new(Self {
            dispatcher: Dispatcher::new(session),
            spawner,
            state: Mutex::new(UtxoProviderState::default()),
            events: EventBus::default(),
            init: OnceCell::new(),
            initialized_tx,
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, UtxoProviderState>, PortError> {
        self.state
            .lock()
            .map_err(|e| PortError::State(format!("utxo provider lock poisoned: {e}")))
    }

    pub fn events(&self) -> &EventBus<UtxoEvent> {
        &self.events
    }

    pub fn on<F>(&self, name: UtxoEventName, listener: F) -> ListenerId
    where
        F: Fn(&UtxoEvent) + Send + Sync + 'static,
    {
        self.events.on(name, listener)
    }

    pub fn off(&self, name: UtxoEventName, id: ListenerId) -> bool {
        self.events.off(name, id)
    }

    pub fn state(&self) -> Result<UtxoProviderState, PortError> {
        Ok(self.lock_state()?.clone())
    }

    pub fn lifecycle(&self) -> Result<UtxoLifecycle, PortError> {
        Ok(derive_utxo_lifecycle(&*self.lock_state()?))
    }

    pub fn xpub(&self) -> Option<String> {
        self.state().ok().and_then(|s| s.xpub)
    }

    pub fn block_explorer_url(&self) -> Option<String> {
        self.state().ok().and_then(|s| s.block_explorer_url)
    }

    pub fn start(self: &Arc<Self>) {
        let me = Arc::clone(self);
        self.spawner.spawn(Box::pin(async move {
            me.initialize().await;
        }));
    }

    pub async fn initialize(&self) {
        self.init
            .get_or_init(|| self.run_initialization())
            .await;
    }

    async fn run_initialization(&self) {
        let is_bitcoin_based = self
            .dispatcher
            .session()
            .resolve_network_type(ChainFamily::Utxo)
            .await;
        if !is_bitcoin_based {
            debug!("active chain is not bitcoin-based, UTXO provider stays dormant");
            return;
        }

        let initial = match self
            .dispatcher
            .forward(FrameKind::MethodRequest, RequestPayload::new(UTXO_STATE_METHOD))
            .await
        {
            Ok(Value::Null) => None,
            Ok(raw) => match serde_json::from_value::<InitialUtxoState>(raw) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("malformed initial sys provider state: {e}");
                    None
                }
            },
            Err(e) => {
                error!("failed to fetch initial sys provider state: {e}");
                None
            }
        };
        if let Err(e) = self.initialize_state(initial) {
            error!("utxo provider initialization failed: {e}");
        }
    }

    pub fn initialize_state(
        &self,
        initial: Option<InitialUtxoState>,
    ) -> Result<(), ProviderRpcError> {
        let mut out = Vec::new();
        {
            let mut state = self.lock_state()?;
            if state.initialized {
                return Err(ProviderRpcError::internal("Provider already initialized."));
            }
            if let Some(initial) = initial {
                xpub_changed(&mut state, initial.xpub.clone(), &mut out);
                block_explorer_changed(&mut state, initial.block_explorer_url, &mut out);
                unlock_state_changed(
                    &mut state,
                    &json!({ "xpub": initial.xpub, "isUnlocked": initial.is_unlocked }),
                    &mut out,
                );
            }
            state.initialized = true;
            out.push(UtxoEvent::Initialized);
        }
        self.emit_all(out);
        self.initialized_tx.send_replace(true);
        Ok(())
    }

    fn apply<F>(&self, mutate: F) -> Result<(), PortError>
    where
        F: FnOnce(&mut UtxoProviderState, &mut Vec<UtxoEvent>),
    {
        let mut out = Vec::new();
        {
            let mut state = self.lock_state()?;
            mutate(&mut state, &mut out);
        }
        self.emit_all(out);
        Ok(())
    }

    fn emit_all(&self, events: Vec<UtxoEvent>) {
        for event in &events {
            self.events.emit(event);
        }
    }

    /// `params` is the new xpub itself, or `null`.
    pub fn handle_xpub_changed(&self, params: &Value) -> Result<(), PortError> {
        let Some(xpub) = string_or_null(params) else {
            error!(%params, "received invalid xpub, ignoring");
            return Ok(());
        };
        self.apply(|state, out| xpub_changed(state, xpub, out))
    }

    pub fn handle_block_explorer_changed(&self, params: &Value) -> Result<(), PortError> {
        let Some(url) = string_or_null(params) else {
            error!(%params, "received invalid block explorer url, ignoring");
            return Ok(());
        };
        self.apply(|state, out| block_explorer_changed(state, url, out))
    }

    pub fn handle_unlock_state_changed(&self, params: &Value) -> Result<(), PortError> {
        self.apply(|state, out| unlock_state_changed(state, params, out))
    }

    pub fn handle_disconnect(
        &self,
        recoverable: bool,
        message: Option<&str>,
    ) -> Result<(), PortError> {
        self.apply(|state, out| {
            if state.is_permanently_disconnected || (recoverable && state.is_disconnected) {
                return;
            }
            let error = if recoverable {
                state.is_disconnected = true;
                ProviderRpcError::recoverable_disconnect(message)
            } else {
                state.xpub = None;
                state.block_explorer_url = None;
                state.is_unlocked = false;
                state.is_permanently_disconnected = true;
                ProviderRpcError::permanent_disconnect(message)
            };
            warn!(code = error.code, "utxo provider disconnected: {}", error.message);
            out.push(UtxoEvent::Disconnect(error));
        })
    }

    pub async fn request(&self, args: &Value) -> Result<Value, ProviderRpcError> {
        let args = RequestArguments::from_value(args)?;
        if self.state()?.is_permanently_disconnected {
            return Err(ProviderRpcError::disconnected());
        }
        self.dispatcher
            .forward(FrameKind::MethodRequest, args.into_payload())
            .await
    }

    pub async fn is_unlocked(&self) -> bool {
        let mut ready = self.initialized_tx.subscribe();
        let initialized = *ready.borrow();
        if !initialized && ready.wait_for(|done| *done).await.is_err() {
            return false;
        }
        self.state().map(|s| s.is_unlocked).unwrap_or(false)
    }

    /// Tokens minted by the active account.
    pub async fn get_user_minted_tokens(&self) -> Result<Value, ProviderRpcError> {
        self.request(&json!({ "method": MINTED_TOKENS_METHOD, "params": [] }))
            .await
    }

    pub async fn get_asset(&self, guid: &str) -> Result<Value, ProviderRpcError> {
        self.request(&json!({ "method": ASSET_METHOD, "params": [guid] }))
            .await
    }
}

/// Syscoin packs an NFT index into the upper 32 bits of an asset GUID, so
/// any GUID past the 32-bit range names an NFT.
pub fn is_nft(guid: &Value) -> bool {
    let parsed = match guid {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.is_some_and(|g| g > u64::from(u32::MAX))
}

fn string_or_null(params: &Value) -> Option<Option<String>> {
    match params {
        Value::Null => Some(None),
        Value::String(s) => Some(Some(s.clone())),
        _ => None,
    }
}

fn xpub_changed(state: &mut UtxoProviderState, xpub: Option<String>, out: &mut Vec<UtxoEvent>) {
    if state.is_permanently_disconnected {
        return;
    }
    state.is_disconnected = false;
    if state.xpub == xpub {
        return;
    }
    state.xpub = xpub.clone();
    if state.initialized {
        out.push(UtxoEvent::XpubChanged(xpub));
    }
}

fn block_explorer_changed(
    state: &mut UtxoProviderState,
    url: Option<String>,
    out: &mut Vec<UtxoEvent>,
) {
    if state.is_permanently_disconnected {
        return;
    }
    state.is_disconnected = false;
    if state.block_explorer_url == url {
        return;
    }
    state.block_explorer_url = url.clone();
    if state.initialized {
        out.push(UtxoEvent::BlockExplorerChanged(url));
    }
}

fn unlock_state_changed(state: &mut UtxoProviderState, params: &Value, out: &mut Vec<UtxoEvent>) {
    if state.is_permanently_disconnected {
        return;
    }
    let Some(is_unlocked) = params.get("isUnlocked").and_then(Value::as_bool) else {
        error!(%params, "received invalid isUnlocked parameter, ignoring");
        return;
    };
    state.is_disconnected = false;
    if is_unlocked == state.is_unlocked {
        return;
    }
    state.is_unlocked = is_unlocked;
    let xpub = match params.get("xpub") {
        Some(Value::String(x)) => Some(x.clone()),
        _ => state.xpub.clone(),
    };
    xpub_changed(state, xpub, out);
}
