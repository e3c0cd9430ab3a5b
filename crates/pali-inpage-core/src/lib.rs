pub mod domain;
pub mod error;
pub mod events;
pub mod ports;
pub mod state_machine;
pub mod validation;

pub use domain::{
    ChainFamily, EvmProviderState, FrameKind, InboundMessage, InitialEvmState, InitialUtxoState,
    JsonRpcRequest, JsonRpcResponse, NotificationChannel, NotificationEnvelope, ProviderInfo,
    RequestFrame, RequestPayload, ResponseDetail, RpcReply, TimestampMs, UtxoProviderState,
};
pub use error::{codes, ProviderRpcError, RouterError};
pub use events::{
    BusEvent, EventBus, EvmEvent, EvmEventName, ListenerId, UtxoEvent, UtxoEventName,
};
pub use ports::{
    AnnounceSink, BoxFuture, ClockPort, InboundHandler, PortError, Spawner, Transport,
};
pub use state_machine::{derive_evm_lifecycle, derive_utxo_lifecycle, EvmLifecycle, UtxoLifecycle};
pub use validation::RequestArguments;
