//! DOM-backed ports: `window.postMessage` out, custom events in.

use std::sync::{Arc, Mutex};

use js_sys::{Function, Object, Reflect, JSON};
use serde::Serialize;
use tracing::{debug, error};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{AddEventListenerOptions, CustomEvent, CustomEventInit, Event, Window};

use pali_inpage_core::{
    AnnounceSink, InboundHandler, InboundMessage, NotificationChannel, PortError, ProviderInfo,
    RequestFrame, ResponseDetail, Transport,
};

use crate::announce::ANNOUNCE_EVENT;
use crate::bridge::InpageBridge;
use crate::clock::SystemClockAdapter;
use crate::spawn::LocalSpawner;
use crate::BridgeConfig;

fn window() -> Result<Window, PortError> {
    web_sys::window().ok_or_else(|| PortError::Transport("no window in this context".to_owned()))
}

fn js_err(what: &str, e: JsValue) -> PortError {
    PortError::Transport(format!("{what}: {e:?}"))
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, PortError> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| PortError::Transport(format!("serialization failed: {e}")))
}

/// Event `detail` as the bridge sees it: absent, null, or JSON text.
fn read_detail(event: &Event) -> ResponseDetail {
    let detail = match event.dyn_ref::<CustomEvent>() {
        Some(custom) => custom.detail(),
        None => JsValue::UNDEFINED,
    };
    if detail.is_undefined() {
        ResponseDetail::Undefined
    } else if detail.is_null() {
        ResponseDetail::Null
    } else if let Some(text) = detail.as_string() {
        ResponseDetail::Json(text)
    } else {
        JSON::stringify(&detail)
            .ok()
            .and_then(|s| s.as_string())
            .map(ResponseDetail::Json)
            .unwrap_or(ResponseDetail::Undefined)
    }
}

pub struct BrowserTransport {
    evm_event: String,
    utxo_event: String,
    handler: Arc<Mutex<Option<InboundHandler>>>,
}

impl std::fmt::Debug for BrowserTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserTransport")
            .field("evm_event", &self.evm_event)
            .field("utxo_event", &self.utxo_event)
            .finish_non_exhaustive()
    }
}

impl BrowserTransport {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            evm_event: config.evm_notification_event.clone(),
            utxo_event: config.utxo_notification_event.clone(),
            handler: Arc::new(Mutex::new(None)),
        }
    }

    fn current_handler(slot: &Mutex<Option<InboundHandler>>) -> Option<InboundHandler> {
        match slot.lock() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                error!("inbound handler lock poisoned: {e}");
                None
            }
        }
    }

    fn listen_notifications(&self, window: &Window, name: &str, channel: NotificationChannel) {
        let slot = Arc::clone(&self.handler);
        let listener = Closure::<dyn FnMut(Event)>::new(move |event: Event| {
            let detail = match read_detail(&event) {
                ResponseDetail::Json(text) => text,
                _ => {
                    debug!(?channel, "notification without detail");
                    return;
                }
            };
            if let Some(handler) = Self::current_handler(&slot) {
                handler(InboundMessage::Notification { channel, detail });
            }
        });
        if let Err(e) =
            window.add_event_listener_with_callback(name, listener.as_ref().unchecked_ref())
        {
            error!(event = name, "cannot listen for notifications: {e:?}");
        }
        // Page-lifetime listener.
        listener.forget();
    }
}

impl Transport for BrowserTransport {
    fn post(&self, frame: &RequestFrame) -> Result<(), PortError> {
        let window = window()?;
        let slot = Arc::clone(&self.handler);
        let id = frame.id.clone();
        let listener = Closure::once_into_js(move |event: Event| {
            if let Some(handler) = Self::current_handler(&slot) {
                handler(InboundMessage::Response {
                    id,
                    detail: read_detail(&event),
                });
            }
        });
        let options = AddEventListenerOptions::new();
        options.set_once(true);
        options.set_passive(true);
        window
            .add_event_listener_with_callback_and_add_event_listener_options(
                &frame.id,
                listener.unchecked_ref::<Function>(),
                &options,
            )
            .map_err(|e| js_err("cannot register response listener", e))?;

        window
            .post_message(&to_js(frame)?, "*")
            .map_err(|e| js_err("postMessage failed", e))
    }

    fn on_message(&self, handler: InboundHandler) {
        match self.handler.lock() {
            Ok(mut slot) => *slot = Some(handler),
            Err(e) => {
                error!("cannot install inbound handler: {e}");
                return;
            }
        }
        match window() {
            Ok(window) => {
                self.listen_notifications(&window, &self.evm_event, NotificationChannel::Evm);
                self.listen_notifications(&window, &self.utxo_event, NotificationChannel::Utxo);
            }
            Err(e) => error!("notifications unavailable: {e}"),
        }
    }
}

/// Dispatches `eip6963:announceProvider` with `{ info, provider }`.
#[derive(Debug, Clone)]
pub struct BrowserAnnounceSink {
    provider: JsValue,
}

impl BrowserAnnounceSink {
    pub fn new(provider: JsValue) -> Self {
        Self { provider }
    }
}

impl AnnounceSink for BrowserAnnounceSink {
    fn announce(&self, info: &ProviderInfo) -> Result<(), PortError> {
        let detail = Object::new();
        Reflect::set(&detail, &"info".into(), &to_js(info)?)
            .map_err(|e| js_err("cannot build announcement", e))?;
        Reflect::set(&detail, &"provider".into(), &self.provider)
            .map_err(|e| js_err("cannot build announcement", e))?;
        let detail = Object::freeze(&detail);

        let init = CustomEventInit::new();
        init.set_detail(&detail);
        let event = CustomEvent::new_with_event_init_dict(ANNOUNCE_EVENT, &init)
            .map_err(|e| js_err("cannot create announcement event", e))?;
        window()?
            .dispatch_event(&event)
            .map(|_| ())
            .map_err(|e| js_err("announcement dispatch failed", e))
    }
}

/// `chrome.runtime.getURL(path)`, when running inside the extension.
pub fn runtime_icon_url(path: &str) -> Option<String> {
    let global = js_sys::global();
    let chrome = Reflect::get(&global, &"chrome".into()).ok()?;
    let runtime = Reflect::get(&chrome, &"runtime".into()).ok()?;
    let get_url = Reflect::get(&runtime, &"getURL".into())
        .ok()?
        .dyn_into::<Function>()
        .ok()?;
    get_url
        .call1(&runtime, &JsValue::from_str(path))
        .ok()?
        .as_string()
}

/// Builds the page's bridge on the DOM ports.
pub fn start_bridge(config: BridgeConfig) -> InpageBridge {
    let transport = Arc::new(BrowserTransport::new(&config));
    InpageBridge::new(
        config,
        transport,
        Arc::new(SystemClockAdapter),
        Arc::new(LocalSpawner),
    )
}
