//! Typed publish/subscribe used by both facades.
//!
//! Emission works on a snapshot of the listener list taken before the first
//! callback runs: a listener removed during an emit still receives that emit,
//! and a listener added during an emit first hears the next one.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::ProviderRpcError;

pub trait BusEvent: Clone + Send + Sync + 'static {
    type Name: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn name(&self) -> Self::Name;
}

pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct EventBus<E: BusEvent> {
    inner: Mutex<BusInner<E>>,
}

struct BusInner<E: BusEvent> {
    next_id: u64,
    listeners: HashMap<E::Name, Vec<(ListenerId, Listener<E>)>>,
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                next_id: 0,
                listeners: HashMap::new(),
            }),
        }
    }
}

impl<E: BusEvent> Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let g = self.lock();
        let counts: HashMap<_, _> = g.listeners.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl<E: BusEvent> EventBus<E> {
    // Poison is ignored; listeners never run under this lock.
    fn lock(&self) -> MutexGuard<'_, BusInner<E>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on<F>(&self, name: E::Name, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut g = self.lock();
        g.next_id = g.next_id.saturating_add(1);
        let id = ListenerId(g.next_id);
        g.listeners
            .entry(name)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn off(&self, name: E::Name, id: ListenerId) -> bool {
        let mut g = self.lock();
        let Some(list) = g.listeners.get_mut(&name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    pub fn remove_all(&self, name: E::Name) {
        self.lock().listeners.remove(&name);
    }

    pub fn listener_count(&self, name: E::Name) -> usize {
        self.lock().listeners.get(&name).map_or(0, Vec::len)
    }

    /// Returns how many listeners were invoked.
    pub fn emit(&self, event: &E) -> usize {
        let snapshot: Vec<Listener<E>> = self
            .lock()
            .listeners
            .get(&event.name())
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvmEventName {
    Connect,
    Disconnect,
    ChainChanged,
    AccountsChanged,
    ExposureChanged,
    Initialized,
}

impl EvmEventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EvmEventName::Connect => "connect",
            EvmEventName::Disconnect => "disconnect",
            EvmEventName::ChainChanged => "chainChanged",
            EvmEventName::AccountsChanged => "accountsChanged",
            EvmEventName::ExposureChanged => "_exposureChanged",
            EvmEventName::Initialized => "_initialized",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvmEvent {
    Connect { chain_id: String },
    Disconnect(ProviderRpcError),
    ChainChanged(String),
    AccountsChanged(Vec<String>),
    ExposureChanged(bool),
    Initialized,
}

impl BusEvent for EvmEvent {
    type Name = EvmEventName;

    fn name(&self) -> EvmEventName {
        match self {
            EvmEvent::Connect { .. } => EvmEventName::Connect,
            EvmEvent::Disconnect(_) => EvmEventName::Disconnect,
            EvmEvent::ChainChanged(_) => EvmEventName::ChainChanged,
            EvmEvent::AccountsChanged(_) => EvmEventName::AccountsChanged,
            EvmEvent::ExposureChanged(_) => EvmEventName::ExposureChanged,
            EvmEvent::Initialized => EvmEventName::Initialized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UtxoEventName {
    XpubChanged,
    BlockExplorerChanged,
    Disconnect,
    Initialized,
}

impl UtxoEventName {
    pub fn as_str(self) -> &'static str {
        match self {
            UtxoEventName::XpubChanged => "xpubChanged",
            UtxoEventName::BlockExplorerChanged => "blockExplorerChanged",
            UtxoEventName::Disconnect => "disconnect",
            UtxoEventName::Initialized => "_initialized",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UtxoEvent {
    XpubChanged(Option<String>),
    BlockExplorerChanged(Option<String>),
    Disconnect(ProviderRpcError),
    Initialized,
}

impl BusEvent for UtxoEvent {
    type Name = UtxoEventName;

    fn name(&self) -> UtxoEventName {
        match self {
            UtxoEvent::XpubChanged(_) => UtxoEventName::XpubChanged,
            UtxoEvent::BlockExplorerChanged(_) => UtxoEventName::BlockExplorerChanged,
            UtxoEvent::Disconnect(_) => UtxoEventName::Disconnect,
            UtxoEvent::Initialized => UtxoEventName::Initialized,
        }
    }
}
