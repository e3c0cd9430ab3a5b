//! EIP-6963 provider discovery.

use tracing::{info, warn};

use pali_inpage_core::{AnnounceSink, PortError, ProviderInfo};

use crate::BridgeConfig;

pub const ANNOUNCE_EVENT: &str = "eip6963:announceProvider";

#[derive(Debug, Clone)]
pub struct ProviderAnnouncer {
    info: ProviderInfo,
}

impl ProviderAnnouncer {
    /// `runtime_icon` maps the packaged icon path to an extension URL; it
    /// returns `None` outside an extension context.
    pub fn new<R>(config: &BridgeConfig, uuid: impl Into<String>, runtime_icon: R) -> Self
    where
        R: FnOnce(&str) -> Option<String>,
    {
        let icon = runtime_icon(&config.provider_icon_path)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| {
                warn!("extension runtime unavailable, announcing fallback icon");
                config.fallback_icon_url.clone()
            });
        Self {
            info: ProviderInfo {
                uuid: uuid.into(),
                name: config.provider_name.clone(),
                icon,
                rdns: config.provider_rdns.clone(),
            },
        }
    }

    pub fn info(&self) -> &ProviderInfo {
        &self.info
    }

    /// Fires the announcement once. Failures are reported, never retried.
    pub fn announce(&self, sink: &dyn AnnounceSink) -> Result<(), PortError> {
        sink.announce(&self.info)?;
        info!(rdns = %self.info.rdns, uuid = %self.info.uuid, "provider announced");
        Ok(())
    }
}
