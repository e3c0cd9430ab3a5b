mod common;

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use pali_inpage_adapters::config::{EVM_STATE_METHOD, UTXO_STATE_METHOD};
use pali_inpage_adapters::LegacySend;
use pali_inpage_core::{codes, EvmEvent, EvmLifecycle, FrameKind, InitialEvmState};

use common::{drain, evm_chain_state, harness, not_bitcoin, record_evm};

#[tokio::test]
async fn happy_path_initialization_connects_once() {
    let h = harness();
    let seen = h.wallet_responder(not_bitcoin(), evm_chain_state());
    let evm = h.evm();
    let events = record_evm(&evm);

    evm.initialize().await;

    let state = evm.state().expect("state");
    assert!(state.is_connected);
    assert!(state.is_unlocked);
    assert!(state.initialized);
    assert_eq!(state.chain_id.as_deref(), Some("0x1"));
    assert_eq!(state.network_version.as_deref(), Some("1"));
    assert_eq!(state.selected_address.as_deref(), Some("0xabc"));
    assert_eq!(evm.lifecycle().expect("lifecycle"), EvmLifecycle::Connected);
    assert_eq!(
        drain(&events),
        vec![
            EvmEvent::Connect {
                chain_id: "0x1".to_owned()
            },
            EvmEvent::ChainChanged("0x1".to_owned()),
            EvmEvent::Initialized,
        ]
    );
    assert_eq!(
        *seen.lock().expect("methods"),
        vec![UTXO_STATE_METHOD.to_owned(), EVM_STATE_METHOD.to_owned()]
    );
}

#[tokio::test]
async fn bitcoin_based_chain_leaves_evm_facade_dormant() {
    let h = harness();
    let seen = h.wallet_responder(json!({ "isBitcoinBased": true }), evm_chain_state());
    let evm = h.evm();
    let events = record_evm(&evm);

    evm.initialize().await;
    evm.initialize().await;

    let state = evm.state().expect("state");
    assert!(!state.initialized);
    assert!(state.is_bitcoin_based);
    assert!(drain(&events).is_empty());
    assert_eq!(*seen.lock().expect("methods"), vec![UTXO_STATE_METHOD.to_owned()]);
    assert_eq!(evm.lifecycle().expect("lifecycle"), EvmLifecycle::Uninitialized);
}

#[tokio::test]
async fn failed_state_fetch_still_initializes() {
    let h = harness();
    h.session.record_network_type(false).expect("record");
    let evm = h.evm();
    let init = tokio::spawn({
        let evm = Arc::clone(&evm);
        async move { evm.initialize().await }
    });
    let frame = h.expect_frame().await;
    assert_eq!(frame.data.method, EVM_STATE_METHOD);
    h.transport
        .respond_error(&frame.id, -32000, "keyring not ready")
        .expect("respond");
    init.await.expect("join");

    let state = evm.state().expect("state");
    assert!(state.initialized);
    assert!(!state.is_connected);
}

#[tokio::test]
async fn state_initializer_runs_once() {
    let h = harness();
    let evm = h.evm();
    evm.initialize_state(None).expect("first");
    let err = evm
        .initialize_state(Some(InitialEvmState::default()))
        .expect_err("second call must fail");
    assert_eq!(err.code, codes::INTERNAL);
    assert!(evm.state().expect("state").initialized);
}

fn initialized_facade(
    h: &common::Harness,
) -> (
    Arc<pali_inpage_adapters::EvmFacade>,
    Arc<Mutex<Vec<EvmEvent>>>,
) {
    let evm = h.evm();
    let initial: InitialEvmState =
        serde_json::from_value(evm_chain_state()).expect("initial state");
    evm.initialize_state(Some(initial)).expect("initialize");
    let events = record_evm(&evm);
    (evm, events)
}

#[tokio::test]
async fn malformed_chain_id_is_dropped_silently() {
    let h = harness();
    let (evm, events) = initialized_facade(&h);
    let before = evm.state().expect("state");

    for params in [
        json!({ "chainId": "not-hex", "networkVersion": "1" }),
        json!({ "chainId": "0x2", "networkVersion": "" }),
        json!({ "chainId": 2, "networkVersion": 2 }),
    ] {
        evm.handle_chain_changed(&params).expect("handle");
    }

    assert_eq!(evm.state().expect("state"), before);
    assert!(drain(&events).is_empty());
}

#[tokio::test]
async fn repeated_chain_change_does_not_reconnect() {
    let h = harness();
    let (evm, events) = initialized_facade(&h);

    let same = json!({ "chainId": "0x1", "networkVersion": "1" });
    evm.handle_chain_changed(&same).expect("first");
    evm.handle_chain_changed(&same).expect("second");
    assert!(drain(&events).is_empty());

    evm.handle_chain_changed(&json!({ "chainId": "0x39", "networkVersion": 57 }))
        .expect("switch");
    assert_eq!(drain(&events), vec![EvmEvent::ChainChanged("0x39".to_owned())]);
    assert_eq!(evm.network_version().as_deref(), Some("57"));
}

#[tokio::test]
async fn loading_network_is_a_recoverable_disconnect() {
    let h = harness();
    let (evm, events) = initialized_facade(&h);

    evm.handle_chain_changed(&json!({ "chainId": "0x1", "networkVersion": "loading" }))
        .expect("loading");
    assert!(!evm.is_connected());
    let emitted = drain(&events);
    assert!(matches!(
        emitted.as_slice(),
        [EvmEvent::Disconnect(err)] if err.code == codes::RECOVERABLE_DISCONNECT
    ));
    assert_eq!(evm.lifecycle().expect("lifecycle"), EvmLifecycle::Disconnected);

    evm.handle_chain_changed(&json!({ "chainId": "0x1", "networkVersion": "1" }))
        .expect("reconnect");
    assert_eq!(
        drain(&events),
        vec![EvmEvent::Connect {
            chain_id: "0x1".to_owned()
        }]
    );
}

#[tokio::test]
async fn permanent_disconnect_latches() {
    let h = harness();
    let (evm, events) = initialized_facade(&h);

    evm.handle_disconnect(false, None).expect("disconnect");
    let state = evm.state().expect("state");
    assert!(state.is_permanently_disconnected);
    assert_eq!(state.chain_id, None);
    assert_eq!(state.accounts, None);
    assert_eq!(state.selected_address, None);
    assert!(!state.is_unlocked);
    let emitted = drain(&events);
    assert!(matches!(
        emitted.as_slice(),
        [EvmEvent::Disconnect(err)] if err.code == codes::PERMANENT_DISCONNECT
    ));

    evm.handle_disconnect(true, None).expect("recoverable");
    evm.handle_disconnect(false, None).expect("again");
    evm.handle_chain_changed(&json!({ "chainId": "0x1", "networkVersion": "1" }))
        .expect("chain");
    evm.handle_accounts_changed(&json!(["0xdef"])).expect("accounts");
    assert!(drain(&events).is_empty());
    assert!(evm.is_permanently_disconnected());
    assert_eq!(
        evm.lifecycle().expect("lifecycle"),
        EvmLifecycle::PermanentlyDisconnected
    );

    let err = evm
        .request(&json!({ "method": "eth_chainId" }))
        .await
        .expect_err("latched facade rejects");
    assert_eq!(err.code, codes::DISCONNECTED);
    h.assert_no_frame();
}

#[tokio::test]
async fn invalid_request_shapes_never_reach_transport() {
    let h = harness();
    let evm = h.evm();
    let cases = [
        (Value::Null, codes::INVALID_REQUEST_ARGS),
        (json!([{ "method": "eth_chainId" }]), codes::INVALID_REQUEST_ARGS),
        (json!({ "method": 123 }), codes::INVALID_REQUEST_METHOD),
        (json!({ "method": "" }), codes::INVALID_REQUEST_METHOD),
        (
            json!({ "method": "x", "params": "not-array-or-object" }),
            codes::INVALID_REQUEST_PARAMS,
        ),
        (json!({ "method": "x", "params": null }), codes::INVALID_REQUEST_PARAMS),
    ];
    for (args, code) in cases {
        let err = evm.request(&args).await.expect_err("must reject");
        assert_eq!(err.code, code, "args: {args}");
    }
    h.assert_no_frame();
}

#[tokio::test]
async fn account_queries_feed_the_mirror() {
    let h = harness();
    let (evm, events) = initialized_facade(&h);

    let call = tokio::spawn({
        let evm = Arc::clone(&evm);
        async move { evm.request(&json!({ "method": "eth_accounts" })).await }
    });
    let frame = h.expect_frame().await;
    h.transport
        .respond(&frame.id, json!(["0xdef", null]))
        .expect("respond");
    assert_eq!(call.await.expect("join").expect("accounts"), json!(["0xdef", null]));

    assert_eq!(evm.accounts(), vec!["0xdef".to_owned()]);
    assert_eq!(evm.selected_address().as_deref(), Some("0xdef"));
    assert_eq!(
        drain(&events),
        vec![EvmEvent::AccountsChanged(vec!["0xdef".to_owned()])]
    );
}

#[tokio::test]
async fn malformed_accounts_are_treated_as_empty() {
    let h = harness();
    let (evm, events) = initialized_facade(&h);
    evm.handle_accounts_changed(&json!(["0xabc", 7])).expect("handle");
    assert!(evm.accounts().is_empty());
    assert_eq!(evm.selected_address(), None);
    assert_eq!(drain(&events), vec![EvmEvent::AccountsChanged(vec![])]);
}

#[tokio::test]
async fn locking_clears_accounts() {
    let h = harness();
    let (evm, events) = initialized_facade(&h);
    evm.handle_unlock_state_changed(&json!({ "isUnlocked": false }))
        .expect("lock");
    assert!(!evm.state().expect("state").is_unlocked);
    assert_eq!(drain(&events), vec![EvmEvent::AccountsChanged(vec![])]);

    evm.handle_unlock_state_changed(&json!({ "isUnlocked": "yes" }))
        .expect("invalid flag ignored");
    assert!(drain(&events).is_empty());
}

#[tokio::test]
async fn legacy_sync_send_answers_locally() {
    let h = harness();
    let evm = h.evm();
    evm.handle_accounts_changed(&json!(["0xabc"])).expect("accounts");

    let outcome = evm.send(json!("eth_accounts"), None).expect("send");
    let LegacySend::Sync(resp) = outcome else {
        panic!("eth_accounts without params must answer synchronously");
    };
    assert_eq!(resp.jsonrpc, "2.0");
    assert_eq!(resp.result, json!(["0xabc"]));
    h.assert_no_frame();

    let resp = evm
        .send(json!({ "id": 3, "jsonrpc": "2.0", "method": "eth_coinbase" }), None)
        .expect("coinbase");
    assert!(matches!(resp, LegacySend::Sync(r) if r.result == json!("0xabc") && r.id == json!(3)));

    let err = evm
        .send(json!("eth_sendTransaction"), None)
        .expect_err("unsupported sync method");
    assert_eq!(err.code, codes::UNSUPPORTED_METHOD);
    h.assert_no_frame();
}

#[tokio::test]
async fn legacy_send_with_params_goes_async() {
    let h = harness();
    let evm = h.evm();
    let LegacySend::Pending(pending) = evm
        .send(json!("eth_getBalance"), Some(json!(["0xabc", "latest"])))
        .expect("send")
    else {
        panic!("method with params must go through the transport");
    };
    let call = tokio::spawn(pending);
    let frame = h.expect_frame().await;
    assert_eq!(frame.data.params, Some(json!(["0xabc", "latest"])));
    h.transport.respond(&frame.id, json!("0x64")).expect("respond");
    assert_eq!(call.await.expect("join").expect("balance"), json!("0x64"));
}

#[tokio::test]
async fn send_async_wraps_result_and_rejects_batches() {
    let h = harness();
    let evm = h.evm();

    let err = evm
        .send_async(&json!([{ "method": "eth_chainId" }]))
        .await
        .expect_err("batch");
    assert_eq!(err.code, codes::INVALID_BATCH_REQUEST);

    let call = tokio::spawn({
        let evm = Arc::clone(&evm);
        async move {
            evm.send_async(&json!({ "id": 42, "method": "eth_chainId" }))
                .await
        }
    });
    let frame = h.expect_frame().await;
    h.transport.respond(&frame.id, json!("0x1")).expect("respond");
    let resp = call.await.expect("join").expect("response");
    assert_eq!(resp.id, json!(42));
    assert_eq!(resp.jsonrpc, "2.0");
    assert_eq!(resp.result, json!("0x1"));
}

#[tokio::test]
async fn send_async_account_results_feed_the_sync_path() {
    let h = harness();
    let evm = h.evm();
    evm.handle_accounts_changed(&json!([])).expect("no accounts");

    let call = tokio::spawn({
        let evm = Arc::clone(&evm);
        async move {
            evm.send_async(&json!({ "id": 1, "method": "eth_requestAccounts" }))
                .await
        }
    });
    let frame = h.expect_frame().await;
    assert_eq!(frame.data.method, "eth_requestAccounts");
    h.transport.respond(&frame.id, json!(["0xabc"])).expect("respond");
    let resp = call.await.expect("join").expect("response");
    assert_eq!(resp.result, json!(["0xabc"]));

    assert_eq!(evm.selected_address().as_deref(), Some("0xabc"));
    let LegacySend::Sync(sync) = evm.send(json!("eth_accounts"), None).expect("send") else {
        panic!("eth_accounts without params must answer synchronously");
    };
    assert_eq!(sync.result, json!(["0xabc"]));
}

#[tokio::test]
async fn latched_facade_rejects_legacy_entry_points() {
    let h = harness();
    let (evm, _events) = initialized_facade(&h);
    evm.handle_disconnect(false, None).expect("disconnect");

    let err = evm
        .send_async(&json!({ "id": 1, "method": "eth_chainId" }))
        .await
        .expect_err("sendAsync");
    assert_eq!(err.code, codes::DISCONNECTED);
    assert_eq!(evm.enable().await.expect_err("enable").code, codes::DISCONNECTED);
    assert_eq!(evm.disable().await.expect_err("disable").code, codes::DISCONNECTED);

    let (tx, rx) = tokio::sync::oneshot::channel();
    evm.send_with_callback(json!({ "id": 2, "method": "net_version" }), move |outcome| {
        let _ = tx.send(outcome);
    });
    let err = rx.await.expect("callback ran").expect_err("callback");
    assert_eq!(err.code, codes::DISCONNECTED);
    h.assert_no_frame();
}

#[tokio::test]
async fn send_with_callback_delivers_response() {
    let h = harness();
    let evm = h.evm();
    let (tx, rx) = tokio::sync::oneshot::channel();
    evm.send_with_callback(json!({ "id": 1, "method": "net_version" }), move |outcome| {
        let _ = tx.send(outcome);
    });
    let frame = h.expect_frame().await;
    h.transport.respond(&frame.id, json!("1")).expect("respond");
    let resp = rx.await.expect("callback ran").expect("response");
    assert_eq!(resp.result, json!("1"));
}

#[tokio::test]
async fn enable_and_disable_use_dedicated_frames() {
    let h = harness();
    let evm = h.evm();

    let call = tokio::spawn({
        let evm = Arc::clone(&evm);
        async move { evm.enable().await }
    });
    let frame = h.expect_frame().await;
    assert_eq!(frame.kind, FrameKind::Enable);
    assert_eq!(frame.data.method, "eth_requestAccounts");
    h.transport.respond(&frame.id, json!(["0xabc"])).expect("respond");
    call.await.expect("join").expect("enable");
    assert_eq!(evm.selected_address().as_deref(), Some("0xabc"));

    let call = tokio::spawn({
        let evm = Arc::clone(&evm);
        async move { evm.disable().await }
    });
    let frame = h.expect_frame().await;
    assert_eq!(frame.kind, FrameKind::Disable);
    h.transport.respond(&frame.id, Value::Null).expect("respond");
    call.await.expect("join").expect("disable");
}

#[tokio::test]
async fn is_unlocked_waits_for_initialization() {
    let h = harness();
    let evm = h.evm();
    let waiter = tokio::spawn({
        let evm = Arc::clone(&evm);
        async move { evm.is_unlocked().await }
    });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert!(!waiter.is_finished());

    let initial: InitialEvmState =
        serde_json::from_value(evm_chain_state()).expect("initial state");
    evm.initialize_state(Some(initial)).expect("initialize");
    assert!(waiter.await.expect("join"));
}

#[tokio::test]
async fn exposure_toggles_emit_once() {
    let h = harness();
    let (evm, events) = initialized_facade(&h);
    evm.set_exposed(true).expect("already exposed");
    evm.set_exposed(false).expect("hide");
    evm.set_exposed(false).expect("hide again");
    assert!(!evm.state().expect("state").is_exposed);
    assert_eq!(drain(&events), vec![EvmEvent::ExposureChanged(false)]);
}
