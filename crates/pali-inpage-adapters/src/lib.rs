pub mod announce;
pub mod bridge;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod evm;
pub mod logging;
pub mod memory;
pub mod router;
pub mod session;
pub mod spawn;
pub mod utxo;

#[cfg(target_arch = "wasm32")]
pub mod browser;

pub use announce::ProviderAnnouncer;
pub use bridge::{Facade, InpageBridge};
pub use cache::StateCache;
pub use clock::{ManualClock, SystemClockAdapter};
pub use config::BridgeConfig;
pub use dispatch::{Dispatcher, LegacySend};
pub use evm::EvmFacade;
pub use logging::init_logging;
pub use memory::InMemoryTransport;
pub use router::NotificationRouter;
pub use session::ProviderSession;
#[cfg(target_arch = "wasm32")]
pub use spawn::LocalSpawner;
#[cfg(not(target_arch = "wasm32"))]
pub use spawn::TokioSpawner;
pub use utxo::{is_nft, UtxoFacade};
