#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub network_type_cache_ttl_ms: u64,
    pub provider_state_cache_ttl_ms: u64,
    pub connection_error_ttl_ms: u64,
    /// Methods whose raw responses are served from the provider-state cache.
    pub cached_methods: Vec<String>,
    /// Substrings marking an error message as "background unreachable".
    pub background_unavailable_patterns: Vec<String>,
    pub evm_notification_event: String,
    pub utxo_notification_event: String,
    pub provider_name: String,
    pub provider_rdns: String,
    pub provider_icon_path: String,
    pub fallback_icon_url: String,
}

pub const EVM_STATE_METHOD: &str = "wallet_getProviderState";
pub const UTXO_STATE_METHOD: &str = "wallet_getSysProviderState";

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            network_type_cache_ttl_ms: 5_000,
            provider_state_cache_ttl_ms: 10_000,
            connection_error_ttl_ms: 2_000,
            cached_methods: vec![EVM_STATE_METHOD.to_owned(), UTXO_STATE_METHOD.to_owned()],
            background_unavailable_patterns: vec![
                "Could not establish connection".to_owned(),
                "Receiving end does not exist".to_owned(),
                "Extension context invalidated".to_owned(),
                "background connection".to_owned(),
            ],
            evm_notification_event: "paliNotification".to_owned(),
            utxo_notification_event: "sys_notification".to_owned(),
            provider_name: "Pali Wallet".to_owned(),
            provider_rdns: "io.paliwallet".to_owned(),
            provider_icon_path: "assets/all_assets/favicon-32.png".to_owned(),
            fallback_icon_url: "https://paliwallet.com/favicon-32.png".to_owned(),
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by `PALI_INPAGE_*` variables. Browser builds have
    /// no environment and always get the defaults.
    pub fn from_env() -> Self {
        #[cfg(target_arch = "wasm32")]
        {
            Self::default()
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            let mut config = Self::default();
            if let Some(v) = env_u64("PALI_INPAGE_NETWORK_TYPE_TTL_MS") {
                config.network_type_cache_ttl_ms = v;
            }
            if let Some(v) = env_u64("PALI_INPAGE_PROVIDER_STATE_TTL_MS") {
                config.provider_state_cache_ttl_ms = v;
            }
            if let Some(v) = env_u64("PALI_INPAGE_CONNECTION_ERROR_TTL_MS") {
                config.connection_error_ttl_ms = v;
            }
            if let Ok(v) = std::env::var("PALI_INPAGE_FALLBACK_ICON_URL") {
                config.fallback_icon_url = v;
            }
            config
        }
    }

    pub fn is_cached_method(&self, method: &str) -> bool {
        self.cached_methods.iter().any(|m| m == method)
    }

    pub fn is_background_unavailable(&self, message: &str) -> bool {
        self.background_unavailable_patterns
            .iter()
            .any(|p| message.contains(p.as_str()))
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, %raw, "ignoring malformed config value: {e}");
            None
        }
    }
}
