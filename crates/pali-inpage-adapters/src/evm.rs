//! EVM-family facade: mirrors accounts, chain and lock state for the page and
//! re-emits them as EIP-1193 events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, error, warn};

use pali_inpage_core::validation::{
    first_hex_account, is_valid_chain_id, normalize_accounts, normalize_network_version,
};
use pali_inpage_core::{
    derive_evm_lifecycle, ChainFamily, EventBus, EvmEvent, EvmEventName, EvmLifecycle,
    EvmProviderState, FrameKind, InitialEvmState, JsonRpcResponse, ListenerId, PortError,
    ProviderRpcError, RequestArguments, RequestPayload, Spawner,
};

use crate::config::EVM_STATE_METHOD;
use crate::dispatch::{
    answer_sync, classify_legacy_send, split_async_payload, Dispatcher, LegacySend, LegacySendForm,
    SyncStateView,
};
use crate::session::ProviderSession;

const ENABLE_METHOD: &str = "eth_requestAccounts";
const DISABLE_METHOD: &str = "wallet_revokePermissions";

pub struct EvmFacade {
    dispatcher: Dispatcher,
    spawner: Arc<dyn Spawner>,
    state: Mutex<EvmProviderState>,
    events: EventBus<EvmEvent>,
    init: OnceCell<()>,
    initializing: AtomicBool,
    initialized_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for EvmFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmFacade")
            .field("state", &self.state())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl EvmFacade {
    pub fn new(session: Arc<ProviderSession>, spawner: Arc<dyn Spawner>) -> Arc<Self> {
        let (initialized_tx, _) = watch::channel(false);
        Arc::new(Self {
            dispatcher: Dispatcher::new(session),
            spawner,
            state: Mutex::new(EvmProviderState::default()),
            events: EventBus::default(),
            init: OnceCell::new(),
            initializing: AtomicBool::new(false),
            initialized_tx,
        })
    }

    fn session(&self) -> &Arc<ProviderSession> {
        self.dispatcher.session()
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, EvmProviderState>, PortError> {
        self.state
            .lock()
            .map_err(|e| PortError::State(format!("evm provider lock poisoned: {e}")))
    }

    pub fn events(&self) -> &EventBus<EvmEvent> {
        &self.events
    }

    pub fn on<F>(&self, name: EvmEventName, listener: F) -> ListenerId
    where
        F: Fn(&EvmEvent) + Send + Sync + 'static,
    {
        self.events.on(name, listener)
    }

    pub fn off(&self, name: EvmEventName, id: ListenerId) -> bool {
        self.events.off(name, id)
    }

    pub fn state(&self) -> Result<EvmProviderState, PortError> {
        Ok(self.lock_state()?.clone())
    }

    pub fn lifecycle(&self) -> Result<EvmLifecycle, PortError> {
        let state = self.lock_state()?;
        Ok(derive_evm_lifecycle(&state, self.initializing.load(Ordering::SeqCst)))
    }

    pub fn chain_id(&self) -> Option<String> {
        self.state().ok().and_then(|s| s.chain_id)
    }

    pub fn network_version(&self) -> Option<String> {
        self.state().ok().and_then(|s| s.network_version)
    }

    pub fn selected_address(&self) -> Option<String> {
        self.state().ok().and_then(|s| s.selected_address)
    }

    pub fn accounts(&self) -> Vec<String> {
        self.state()
            .ok()
            .and_then(|s| s.accounts)
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.state().map(|s| s.is_connected).unwrap_or(false)
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        self.state()
            .map(|s| s.is_permanently_disconnected)
            .unwrap_or(false)
    }

    /// Spawns the initialization routine on the page's executor.
    pub fn start(self: &Arc<Self>) {
        let me = Arc::clone(self);
        self.spawner.spawn(Box::pin(async move {
            me.initialize().await;
        }));
    }

    /// Runs initialization once; concurrent and later callers wait for the
    /// same run.
    pub async fn initialize(&self) {
        self.init
            .get_or_init(|| async {
                self.initializing.store(true, Ordering::SeqCst);
                self.run_initialization().await;
                self.initializing.store(false, Ordering::SeqCst);
            })
            .await;
    }

    async fn run_initialization(&self) {
        let is_bitcoin_based = self
            .session()
            .resolve_network_type(ChainFamily::Evm)
            .await;
        match self.lock_state() {
            Ok(mut state) => state.is_bitcoin_based = is_bitcoin_based,
            Err(e) => warn!("cannot record network type: {e}"),
        }
        if is_bitcoin_based {
            debug!("active chain is bitcoin-based, EVM provider stays dormant");
            return;
        }

        let initial = match self
            .dispatcher
            .forward(FrameKind::MethodRequest, RequestPayload::new(EVM_STATE_METHOD))
            .await
        {
            Ok(Value::Null) => None,
            Ok(raw) => match serde_json::from_value::<InitialEvmState>(raw) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("malformed initial provider state: {e}");
                    None
                }
            },
            Err(e) => {
                error!("failed to fetch initial provider state: {e}");
                None
            }
        };
        if let Err(e) = self.initialize_state(initial) {
            error!("evm provider initialization failed: {e}");
        }
    }

    /// Applies the initial wallet state. Callable once; `initialized` never
    /// goes back to false.
    pub fn initialize_state(
        &self,
        initial: Option<InitialEvmState>,
    ) -> Result<(), ProviderRpcError> {
        let mut out = Vec::new();
        {
            let mut state = self.lock_state()?;
            if state.initialized {
                return Err(ProviderRpcError::internal("Provider already initialized."));
            }
            if let Some(initial) = initial {
                if let Some(flag) = initial.is_bitcoin_based {
                    state.is_bitcoin_based = flag;
                }
                let chain_id = initial.chain_id.as_str().unwrap_or_default().to_owned();
                connect(&mut state, &chain_id, &mut out);
                chain_changed(
                    &mut state,
                    &json!({
                        "chainId": initial.chain_id,
                        "networkVersion": initial.network_version,
                    }),
                    true,
                    &mut out,
                );
                unlock_state_changed(
                    &mut state,
                    &json!({
                        "accounts": initial.accounts,
                        "isUnlocked": initial.is_unlocked,
                    }),
                    &mut out,
                );
                accounts_changed(&mut state, &initial.accounts, &mut out);
            }
            state.initialized = true;
            out.push(EvmEvent::Initialized);
        }
        self.emit_all(out);
        self.initialized_tx.send_replace(true);
        Ok(())
    }

    fn apply<F>(&self, mutate: F) -> Result<(), PortError>
    where
        F: FnOnce(&mut EvmProviderState, &mut Vec<EvmEvent>),
    {
        let mut out = Vec::new();
        {
            let mut state = self.lock_state()?;
            mutate(&mut state, &mut out);
        }
        self.emit_all(out);
        Ok(())
    }

    fn emit_all(&self, events: Vec<EvmEvent>) {
        for event in &events {
            self.events.emit(event);
        }
    }

    pub fn handle_chain_changed(&self, params: &Value) -> Result<(), PortError> {
        self.apply(|state, out| chain_changed(state, params, false, out))
    }

    pub fn handle_unlock_state_changed(&self, params: &Value) -> Result<(), PortError> {
        self.apply(|state, out| unlock_state_changed(state, params, out))
    }

    pub fn handle_accounts_changed(&self, accounts: &Value) -> Result<(), PortError> {
        self.apply(|state, out| accounts_changed(state, accounts, out))
    }

    pub fn handle_disconnect(
        &self,
        recoverable: bool,
        message: Option<&str>,
    ) -> Result<(), PortError> {
        self.apply(|state, out| disconnect(state, recoverable, message, out))
    }

    pub fn handle_is_bitcoin_based(&self, params: &Value) -> Result<(), PortError> {
        let Some(flag) = params.get("isBitcoinBased").and_then(Value::as_bool) else {
            warn!(%params, "pali_isBitcoinBased without a boolean flag");
            return Ok(());
        };
        {
            let mut state = self.lock_state()?;
            if state.is_permanently_disconnected {
                return Ok(());
            }
            state.is_bitcoin_based = flag;
        }
        self.session().record_network_type(flag)
    }

    /// Whether the host should expose this provider as the page's global
    /// EVM provider.
    pub fn set_exposed(&self, exposed: bool) -> Result<(), PortError> {
        self.apply(|state, out| {
            if state.is_exposed != exposed {
                state.is_exposed = exposed;
                out.push(EvmEvent::ExposureChanged(exposed));
            }
        })
    }

    pub async fn request(&self, args: &Value) -> Result<Value, ProviderRpcError> {
        let args = RequestArguments::from_value(args)?;
        self.rpc(FrameKind::MethodRequest, args.into_payload()).await
    }

    /// Every page-initiated call goes through here: the disconnect latch is
    /// checked first and account queries feed the mirrored accounts.
    async fn rpc(
        &self,
        kind: FrameKind,
        payload: RequestPayload,
    ) -> Result<Value, ProviderRpcError> {
        if self.is_permanently_disconnected() {
            return Err(ProviderRpcError::disconnected());
        }
        let feeds_accounts = matches!(payload.method.as_str(), "eth_accounts" | ENABLE_METHOD);
        let result = self.dispatcher.forward(kind, payload).await?;
        if feeds_accounts {
            self.handle_accounts_changed(&result)?;
        }
        Ok(result)
    }

    /// Legacy `enable()`: asks the wallet to connect and returns the accounts.
    pub async fn enable(&self) -> Result<Value, ProviderRpcError> {
        self.rpc(FrameKind::Enable, RequestPayload::new(ENABLE_METHOD)).await
    }

    pub async fn disable(&self) -> Result<Value, ProviderRpcError> {
        self.rpc(FrameKind::Disable, RequestPayload::new(DISABLE_METHOD)).await
    }

    /// Legacy `send(methodOrPayload, params)`.
    pub fn send(
        self: &Arc<Self>,
        method_or_payload: Value,
        params: Option<Value>,
    ) -> Result<LegacySend, ProviderRpcError> {
        match classify_legacy_send(method_or_payload, params) {
            LegacySendForm::Request { method, params } => {
                let me = Arc::clone(self);
                Ok(LegacySend::Pending(Box::pin(async move {
                    let args = json!({ "method": method, "params": params });
                    me.request(&args).await
                })))
            }
            LegacySendForm::Sync(payload) => self.send_sync(&payload).map(LegacySend::Sync),
        }
    }

    /// `sendAsync(payload, cb)` with the callback folded into the returned
    /// future.
    pub async fn send_async(&self, payload: &Value) -> Result<JsonRpcResponse, ProviderRpcError> {
        let (args, id, jsonrpc) = split_async_payload(payload)?;
        let result = self
            .rpc(FrameKind::MethodRequest, args.into_payload())
            .await?;
        Ok(JsonRpcResponse {
            id,
            jsonrpc,
            result,
        })
    }

    /// Legacy `send(payload, callback)`: the callback runs on the page's
    /// executor once the response arrives.
    pub fn send_with_callback<F>(self: &Arc<Self>, payload: Value, callback: F)
    where
        F: FnOnce(Result<JsonRpcResponse, ProviderRpcError>) + Send + 'static,
    {
        let me = Arc::clone(self);
        self.spawner.spawn(Box::pin(async move {
            let outcome = me.send_async(&payload).await;
            callback(outcome);
        }));
    }

    pub fn send_sync(&self, payload: &Value) -> Result<JsonRpcResponse, ProviderRpcError> {
        let view = {
            let state = self.lock_state()?;
            SyncStateView {
                selected_address: state.selected_address.clone(),
                network_version: state.network_version.clone(),
            }
        };
        answer_sync(payload, &view)
    }

    /// Experimental `_metamask.isUnlocked()`. Waits for initialization when
    /// asked too early.
    pub async fn is_unlocked(&self) -> bool {
        let mut ready = self.initialized_tx.subscribe();
        let initialized = *ready.borrow();
        if !initialized && ready.wait_for(|done| *done).await.is_err() {
            return false;
        }
        self.state().map(|s| s.is_unlocked).unwrap_or(false)
    }
}

fn connect(state: &mut EvmProviderState, chain_id: &str, out: &mut Vec<EvmEvent>) {
    if state.is_permanently_disconnected {
        return;
    }
    if !state.is_connected {
        state.is_connected = true;
        out.push(EvmEvent::Connect {
            chain_id: chain_id.to_owned(),
        });
    }
}

/// `announce` lets the initializer publish the first chain before
/// `initialized` is set; pushes before that stay silent.
fn chain_changed(
    state: &mut EvmProviderState,
    params: &Value,
    announce: bool,
    out: &mut Vec<EvmEvent>,
) {
    if state.is_permanently_disconnected {
        debug!("ignoring chain change after permanent disconnect");
        return;
    }
    let chain_id = params
        .get("chainId")
        .and_then(Value::as_str)
        .filter(|c| is_valid_chain_id(c));
    let network_version = params
        .get("networkVersion")
        .and_then(normalize_network_version);
    let (Some(chain_id), Some(network_version)) = (chain_id, network_version) else {
        error!(%params, "received invalid chainId or networkVersion, ignoring");
        return;
    };
    if let Some(flag) = params.get("isBitcoinBased").and_then(Value::as_bool) {
        state.is_bitcoin_based = flag;
    }

    if network_version == "loading" {
        disconnect(state, true, None, out);
        return;
    }
    connect(state, chain_id, out);
    state.network_version = Some(network_version);
    if state.chain_id.as_deref() != Some(chain_id) {
        state.chain_id = Some(chain_id.to_owned());
        if (state.initialized || announce) && !state.is_bitcoin_based {
            out.push(EvmEvent::ChainChanged(chain_id.to_owned()));
        }
    }
}

fn unlock_state_changed(state: &mut EvmProviderState, params: &Value, out: &mut Vec<EvmEvent>) {
    if state.is_permanently_disconnected {
        return;
    }
    let Some(is_unlocked) = params.get("isUnlocked").and_then(Value::as_bool) else {
        error!(%params, "received invalid isUnlocked parameter, ignoring");
        return;
    };
    if is_unlocked != state.is_unlocked {
        state.is_unlocked = is_unlocked;
        let accounts = params
            .get("accounts")
            .filter(|a| !a.is_null())
            .cloned()
            .unwrap_or_else(|| json!([]));
        accounts_changed(state, &accounts, out);
    }
}

fn accounts_changed(state: &mut EvmProviderState, value: &Value, out: &mut Vec<EvmEvent>) {
    if state.is_permanently_disconnected {
        return;
    }
    let (accounts, rejected) = normalize_accounts(value);
    if rejected {
        error!(%value, "received invalid accounts parameter, treating as empty");
    }
    if state.accounts.as_ref() == Some(&accounts) {
        return;
    }
    state.selected_address = first_hex_account(&accounts);
    state.accounts = Some(accounts.clone());
    if state.initialized {
        out.push(EvmEvent::AccountsChanged(accounts));
    }
}

fn disconnect(
    state: &mut EvmProviderState,
    recoverable: bool,
    message: Option<&str>,
    out: &mut Vec<EvmEvent>,
) {
    if !(state.is_connected || (!state.is_permanently_disconnected && !recoverable)) {
        return;
    }
    state.is_connected = false;
    let error = if recoverable {
        ProviderRpcError::recoverable_disconnect(message)
    } else {
        state.chain_id = None;
        state.network_version = None;
        state.accounts = None;
        state.selected_address = None;
        state.is_unlocked = false;
        state.is_permanently_disconnected = true;
        ProviderRpcError::permanent_disconnect(message)
    };
    warn!(code = error.code, "evm provider disconnected: {}", error.message);
    out.push(EvmEvent::Disconnect(error));
}
