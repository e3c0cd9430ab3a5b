#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use pali_inpage_adapters::config::{EVM_STATE_METHOD, UTXO_STATE_METHOD};
use pali_inpage_adapters::memory::result_detail;
use pali_inpage_adapters::{
    BridgeConfig, EvmFacade, InMemoryTransport, ManualClock, NotificationRouter, ProviderSession,
    TokioSpawner, UtxoFacade,
};
use pali_inpage_core::{
    EvmEvent, EvmEventName, InboundMessage, RequestFrame, Transport, UtxoEvent, UtxoEventName,
};

pub const T0: u64 = 1_739_750_400_000;

pub struct Harness {
    pub transport: Arc<InMemoryTransport>,
    pub clock: Arc<ManualClock>,
    pub session: Arc<ProviderSession>,
}

/// Session wired to an in-memory transport; responses are delivered, push
/// notifications are not routed.
pub fn harness() -> Harness {
    harness_with(BridgeConfig::default())
}

pub fn harness_with(config: BridgeConfig) -> Harness {
    let transport = Arc::new(InMemoryTransport::new());
    let clock = Arc::new(ManualClock::starting_at(T0));
    let session = Arc::new(ProviderSession::new(
        config,
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&clock) as _,
    ));
    let weak = Arc::downgrade(&session);
    transport.on_message(Arc::new(move |message| {
        if let InboundMessage::Response { id, detail } = message {
            if let Some(session) = weak.upgrade() {
                session.deliver_response(&id, detail);
            }
        }
    }));
    Harness {
        transport,
        clock,
        session,
    }
}

impl Harness {
    pub fn evm(&self) -> Arc<EvmFacade> {
        EvmFacade::new(Arc::clone(&self.session), Arc::new(TokioSpawner))
    }

    pub fn utxo(&self) -> Arc<UtxoFacade> {
        UtxoFacade::new(Arc::clone(&self.session), Arc::new(TokioSpawner))
    }

    /// Router with notifications from the transport routed through it.
    pub fn router(&self, evm: &Arc<EvmFacade>, utxo: &Arc<UtxoFacade>) -> NotificationRouter {
        NotificationRouter::new(Arc::clone(&self.session), Arc::clone(evm), Arc::clone(utxo))
    }

    /// Answers both provider-state queries on the spot and records every
    /// method posted.
    pub fn wallet_responder(&self, sys_state: Value, evm_state: Value) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        self.transport
            .set_responder(move |frame: &RequestFrame| {
                log.lock()
                    .expect("method log")
                    .push(frame.data.method.clone());
                match frame.data.method.as_str() {
                    UTXO_STATE_METHOD => Some(result_detail(sys_state.clone())),
                    EVM_STATE_METHOD => Some(result_detail(evm_state.clone())),
                    _ => None,
                }
            })
            .expect("install responder");
        seen
    }

    pub async fn expect_frame(&self) -> RequestFrame {
        self.transport.next_frame().await.expect("posted frame")
    }

    pub fn assert_no_frame(&self) {
        assert!(
            self.transport.try_next_frame().is_none(),
            "transport must not be invoked"
        );
    }
}

pub fn evm_chain_state() -> Value {
    json!({
        "accounts": ["0xabc"],
        "chainId": "0x1",
        "networkVersion": "1",
        "isUnlocked": true,
        "isBitcoinBased": false
    })
}

pub fn not_bitcoin() -> Value {
    json!({ "isBitcoinBased": false })
}

pub fn sys_chain_state() -> Value {
    json!({
        "xpub": "zpub6rFR7y4Q2AijBEqTUqu",
        "blockExplorerURL": "https://explorer.syscoin.org",
        "isUnlocked": true,
        "isBitcoinBased": true
    })
}

pub fn record_evm(facade: &EvmFacade) -> Arc<Mutex<Vec<EvmEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for name in [
        EvmEventName::Connect,
        EvmEventName::Disconnect,
        EvmEventName::ChainChanged,
        EvmEventName::AccountsChanged,
        EvmEventName::ExposureChanged,
        EvmEventName::Initialized,
    ] {
        let log = Arc::clone(&log);
        facade.on(name, move |event| {
            log.lock().expect("event log").push(event.clone());
        });
    }
    log
}

pub fn record_utxo(facade: &UtxoFacade) -> Arc<Mutex<Vec<UtxoEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for name in [
        UtxoEventName::XpubChanged,
        UtxoEventName::BlockExplorerChanged,
        UtxoEventName::Disconnect,
        UtxoEventName::Initialized,
    ] {
        let log = Arc::clone(&log);
        facade.on(name, move |event| {
            log.lock().expect("event log").push(event.clone());
        });
    }
    log
}

pub fn drain<T>(log: &Arc<Mutex<Vec<T>>>) -> Vec<T> {
    std::mem::take(&mut *log.lock().expect("event log"))
}
