use crate::domain::{EvmProviderState, UtxoProviderState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmLifecycle {
    Uninitialized,
    Initializing,
    Connected,
    Disconnected,
    PermanentlyDisconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtxoLifecycle {
    Uninitialized,
    Unlocked,
    Locked,
    PermanentlyDisconnected,
}

/// `initializing` is only known to the facade (an init task is in flight),
/// so the caller passes it in.
pub fn derive_evm_lifecycle(state: &EvmProviderState, initializing: bool) -> EvmLifecycle {
    if state.is_permanently_disconnected {
        EvmLifecycle::PermanentlyDisconnected
    } else if !state.initialized {
        if initializing {
            EvmLifecycle::Initializing
        } else {
            EvmLifecycle::Uninitialized
        }
    } else if state.is_connected {
        EvmLifecycle::Connected
    } else {
        EvmLifecycle::Disconnected
    }
}

pub fn derive_utxo_lifecycle(state: &UtxoProviderState) -> UtxoLifecycle {
    if state.is_permanently_disconnected {
        UtxoLifecycle::PermanentlyDisconnected
    } else if !state.initialized {
        UtxoLifecycle::Uninitialized
    } else if state.is_unlocked {
        UtxoLifecycle::Unlocked
    } else {
        UtxoLifecycle::Locked
    }
}
