//! In-process transport standing in for the page's message channel. Frames
//! posted by the bridge are queued for the caller to inspect and answer.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use pali_inpage_core::{
    InboundHandler, InboundMessage, NotificationChannel, PortError, RequestFrame, ResponseDetail,
    Transport,
};

type Responder = Arc<dyn Fn(&RequestFrame) -> Option<ResponseDetail> + Send + Sync>;

pub struct InMemoryTransport {
    handler: Mutex<Option<InboundHandler>>,
    responder: Mutex<Option<Responder>>,
    frames_tx: mpsc::UnboundedSender<RequestFrame>,
    frames_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RequestFrame>>,
    fail_posts: Mutex<Option<String>>,
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport").finish_non_exhaustive()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        Self {
            handler: Mutex::new(None),
            responder: Mutex::new(None),
            frames_tx,
            frames_rx: tokio::sync::Mutex::new(frames_rx),
            fail_posts: Mutex::new(None),
        }
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard<'a, T>(lock: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, PortError> {
        lock.lock()
            .map_err(|e| PortError::State(format!("{what} lock poisoned: {e}")))
    }

    /// Answers matching frames synchronously from inside `post`. Frames the
    /// responder declines (`None`) are queued as usual.
    pub fn set_responder<F>(&self, responder: F) -> Result<(), PortError>
    where
        F: Fn(&RequestFrame) -> Option<ResponseDetail> + Send + Sync + 'static,
    {
        *Self::guard(&self.responder, "responder")? = Some(Arc::new(responder));
        Ok(())
    }

    /// Makes every subsequent `post` fail with `reason`; `None` restores it.
    pub fn fail_posts(&self, reason: Option<&str>) -> Result<(), PortError> {
        *Self::guard(&self.fail_posts, "post failure")? = reason.map(str::to_owned);
        Ok(())
    }

    /// Next frame the bridge posted, waiting if none is queued yet.
    pub async fn next_frame(&self) -> Option<RequestFrame> {
        self.frames_rx.lock().await.recv().await
    }

    pub fn try_next_frame(&self) -> Option<RequestFrame> {
        self.frames_rx.try_lock().ok()?.try_recv().ok()
    }

    pub fn deliver(&self, message: InboundMessage) -> Result<(), PortError> {
        let handler = Self::guard(&self.handler, "inbound handler")?.clone();
        match handler {
            Some(handler) => {
                handler(message);
                Ok(())
            }
            None => Err(PortError::Transport("no inbound handler installed".to_owned())),
        }
    }

    pub fn respond_raw(&self, id: &str, detail: ResponseDetail) -> Result<(), PortError> {
        self.deliver(InboundMessage::Response {
            id: id.to_owned(),
            detail,
        })
    }

    /// Replies `{ "result": result }` to the frame with `id`.
    pub fn respond(&self, id: &str, result: Value) -> Result<(), PortError> {
        self.respond_raw(id, result_detail(result))
    }

    pub fn respond_error(&self, id: &str, code: i64, message: &str) -> Result<(), PortError> {
        self.respond_raw(id, error_detail(code, message))
    }

    pub fn notify(
        &self,
        channel: NotificationChannel,
        method: &str,
        params: Value,
    ) -> Result<(), PortError> {
        let detail = json!({ "method": method, "params": params }).to_string();
        self.deliver(InboundMessage::Notification { channel, detail })
    }
}

impl Transport for InMemoryTransport {
    fn post(&self, frame: &RequestFrame) -> Result<(), PortError> {
        if let Some(reason) = Self::guard(&self.fail_posts, "post failure")?.clone() {
            return Err(PortError::Transport(reason));
        }
        debug!(id = %frame.id, method = %frame.data.method, "frame posted");
        let responder = Self::guard(&self.responder, "responder")?.clone();
        if let Some(detail) = responder.and_then(|r| r(frame)) {
            return self.respond_raw(&frame.id, detail);
        }
        self.frames_tx
            .send(frame.clone())
            .map_err(|e| PortError::Transport(format!("frame queue closed: {e}")))
    }

    fn on_message(&self, handler: InboundHandler) {
        match self.handler.lock() {
            Ok(mut slot) => *slot = Some(handler),
            Err(e) => tracing::error!("cannot install inbound handler: {e}"),
        }
    }
}

pub fn result_detail(result: Value) -> ResponseDetail {
    ResponseDetail::Json(json!({ "result": result }).to_string())
}

pub fn error_detail(code: i64, message: &str) -> ResponseDetail {
    ResponseDetail::Json(json!({ "error": { "code": code, "message": message } }).to_string())
}
