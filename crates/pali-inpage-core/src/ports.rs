use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::{InboundMessage, ProviderInfo, RequestFrame};

#[derive(Debug, Error)]
pub enum PortError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("state error: {0}")]
    State(String),
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type InboundHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Page-side message channel to the wallet process.
///
/// `post` must arrange for the response addressed to `frame.id` to reach the
/// handler installed with `on_message` before the frame leaves.
pub trait Transport: Send + Sync {
    fn post(&self, frame: &RequestFrame) -> Result<(), PortError>;
    fn on_message(&self, handler: InboundHandler);
}

pub trait ClockPort: Send + Sync {
    fn now_ms(&self) -> Result<u64, PortError>;
}

pub trait Spawner: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Destination of the EIP-6963 announcement.
pub trait AnnounceSink {
    fn announce(&self, info: &ProviderInfo) -> Result<(), PortError>;
}
