//! Dispatches wallet push notifications to the facade that owns them.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use pali_inpage_core::{NotificationChannel, NotificationEnvelope, RouterError};

use crate::evm::EvmFacade;
use crate::session::ProviderSession;
use crate::utxo::UtxoFacade;

/// Notification methods the page may receive but the bridge cannot yet
/// deliver.
const UNSUPPORTED_EMITTED: &[&str] = &["eth_subscription"];

#[derive(Debug, Clone)]
pub struct NotificationRouter {
    session: Arc<ProviderSession>,
    evm: Arc<EvmFacade>,
    utxo: Arc<UtxoFacade>,
}

impl NotificationRouter {
    pub fn new(session: Arc<ProviderSession>, evm: Arc<EvmFacade>, utxo: Arc<UtxoFacade>) -> Self {
        Self { session, evm, utxo }
    }

    pub fn route(&self, channel: NotificationChannel, detail: &str) -> Result<(), RouterError> {
        let envelope: NotificationEnvelope = serde_json::from_str(detail).map_err(|e| {
            error!(?channel, "unparsable notification: {e}");
            RouterError::Malformed(e.to_string())
        })?;
        let params = envelope.params.unwrap_or(Value::Null);
        debug!(?channel, method = %envelope.method, "routing notification");
        match channel {
            NotificationChannel::Evm => self.route_evm(&envelope.method, &params),
            NotificationChannel::Utxo => self.route_utxo(&envelope.method, &params),
        }
    }

    fn route_evm(&self, method: &str, params: &Value) -> Result<(), RouterError> {
        match method {
            "pali_accountsChanged" => self.evm.handle_accounts_changed(params)?,
            "pali_unlockStateChanged" => self.evm.handle_unlock_state_changed(params)?,
            "pali_chainChanged" => {
                self.session.invalidate_all()?;
                self.evm.handle_chain_changed(params)?;
            }
            "pali_isBitcoinBased" => self.evm.handle_is_bitcoin_based(params)?,
            "pali_removeProperty" => self.evm.set_exposed(false)?,
            "pali_addProperty" => self.evm.set_exposed(true)?,
            "pali_xpubChanged" | "pali_blockExplorerChanged" => {}
            m if UNSUPPORTED_EMITTED.contains(&m) => {
                warn!(method = m, "notification not yet supported");
                return Err(RouterError::Unsupported(m.to_owned()));
            }
            other => {
                warn!(method = other, "unknown evm notification, disconnecting");
                self.session.invalidate_all()?;
                self.evm.handle_disconnect(false, None)?;
            }
        }
        Ok(())
    }

    fn route_utxo(&self, method: &str, params: &Value) -> Result<(), RouterError> {
        match method {
            "pali_xpubChanged" => self.utxo.handle_xpub_changed(params)?,
            "pali_unlockStateChanged" => self.utxo.handle_unlock_state_changed(params)?,
            "pali_blockExplorerChanged" => self.utxo.handle_block_explorer_changed(params)?,
            other => {
                warn!(method = other, "unknown sys notification, disconnecting");
                self.session.invalidate_all()?;
                self.utxo.handle_disconnect(false, None)?;
            }
        }
        Ok(())
    }
}
