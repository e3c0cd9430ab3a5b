//! One bridge per page: the shared session, both facades and the router,
//! wired to the transport.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{debug, info, warn};

use pali_inpage_core::{
    ChainFamily, ClockPort, InboundMessage, ProviderRpcError, RouterError, Spawner, Transport,
};

use crate::evm::EvmFacade;
use crate::router::NotificationRouter;
use crate::session::ProviderSession;
use crate::utxo::UtxoFacade;
use crate::BridgeConfig;

#[derive(Debug)]
pub struct InpageBridge {
    session: Arc<ProviderSession>,
    evm: Arc<EvmFacade>,
    utxo: Arc<UtxoFacade>,
    router: Arc<NotificationRouter>,
}

impl InpageBridge {
    /// Installs the inbound handler and spawns both initializations.
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn ClockPort>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        let session = Arc::new(ProviderSession::new(config, Arc::clone(&transport), clock));
        let evm = EvmFacade::new(Arc::clone(&session), Arc::clone(&spawner));
        let utxo = UtxoFacade::new(Arc::clone(&session), spawner);
        let router = Arc::new(NotificationRouter::new(
            Arc::clone(&session),
            Arc::clone(&evm),
            Arc::clone(&utxo),
        ));

        let weak_session = Arc::downgrade(&session);
        let weak_router = Arc::downgrade(&router);
        transport.on_message(Arc::new(move |message| {
            dispatch_inbound(&weak_session, &weak_router, message);
        }));

        evm.start();
        utxo.start();
        info!("in-page provider bridge started");

        Self {
            session,
            evm,
            utxo,
            router,
        }
    }

    pub fn session(&self) -> &Arc<ProviderSession> {
        &self.session
    }

    pub fn evm(&self) -> &Arc<EvmFacade> {
        &self.evm
    }

    pub fn utxo(&self) -> &Arc<UtxoFacade> {
        &self.utxo
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    pub fn facade(&self, family: ChainFamily) -> Facade {
        match family {
            ChainFamily::Evm => Facade::Evm(Arc::clone(&self.evm)),
            ChainFamily::Utxo => Facade::Utxo(Arc::clone(&self.utxo)),
        }
    }
}

fn dispatch_inbound(
    session: &Weak<ProviderSession>,
    router: &Weak<NotificationRouter>,
    message: InboundMessage,
) {
    match message {
        InboundMessage::Response { id, detail } => match session.upgrade() {
            Some(session) => session.deliver_response(&id, detail),
            None => debug!(%id, "response after bridge was dropped"),
        },
        InboundMessage::Notification { channel, detail } => {
            let Some(router) = router.upgrade() else {
                debug!(?channel, "notification after bridge was dropped");
                return;
            };
            match router.route(channel, &detail) {
                Ok(()) => {}
                Err(RouterError::Unsupported(method)) => {
                    debug!(%method, "notification dropped: not yet supported")
                }
                Err(e) => warn!(?channel, "notification not applied: {e}"),
            }
        }
    }
}

/// The provider object handed to the page for one chain family.
#[derive(Debug, Clone)]
pub enum Facade {
    Evm(Arc<EvmFacade>),
    Utxo(Arc<UtxoFacade>),
}

impl Facade {
    pub fn family(&self) -> ChainFamily {
        match self {
            Facade::Evm(_) => ChainFamily::Evm,
            Facade::Utxo(_) => ChainFamily::Utxo,
        }
    }

    pub async fn request(&self, args: &Value) -> Result<Value, ProviderRpcError> {
        match self {
            Facade::Evm(evm) => evm.request(args).await,
            Facade::Utxo(utxo) => utxo.request(args).await,
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        match self {
            Facade::Evm(evm) => evm.is_unlocked().await,
            Facade::Utxo(utxo) => utxo.is_unlocked().await,
        }
    }
}
