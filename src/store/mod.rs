//! Observable connection state.
//!
//! The [`Store`] holds the current [`Snapshot`] and a list of listeners. It knows
//! nothing about the network: the connection manager pushes every transition
//! into it through [`Store::set_state`] and [`Store::clear_store`], and
//! consumers read it back with [`Store::get_state`] or subscribe to changes.
//!
//! Listeners are called without arguments and re-read the state themselves.
//! For notifications that only fire when a derived value changes, see
//! [`Store::subscribe_with_selector`]; for the synchronous
//! `subscribe`/`get_snapshot` rendering contract, see [`Store::bind`].

pub mod selector;
pub mod snapshot;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

pub use selector::{Binding, ExternalStore};
pub use snapshot::{Data, ErrorInfo, Frame, Patch, Payload, ReadyState, Snapshot};

/// Change notification callback.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Listeners in registration order.
#[derive(Default)]
struct ListenerSet {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl ListenerSet {
    fn insert(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(entry, _)| *entry != id);
    }

    /// Copy of the current listeners, so emission runs without the lock held
    /// and listeners may (un)subscribe while being notified.
    fn current(&self) -> Vec<Listener> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Handle returned by every `subscribe*` call.
///
/// Dropping the handle does not remove the listener; call
/// [`unsubscribe`](Self::unsubscribe) for that.
pub struct Unsubscribe {
    id: u64,
    listeners: Weak<ListenerSet>,
}

impl Unsubscribe {
    /// Removes the listener. Has no effect if the store is already gone.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(self.id);
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish()
    }
}

struct Shared<T> {
    state: RwLock<Arc<Snapshot<T>>>,
    listeners: Arc<ListenerSet>,
}

impl<T> Shared<T> {
    fn snapshot(&self) -> Arc<Snapshot<T>> {
        // A poisoned lock still guards a fully written Arc, so it is safe to recover.
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn replace(&self, next: Snapshot<T>) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}

/// Holds the current [`Snapshot`] and broadcasts changes.
///
/// Cloning a store is cheap and yields another handle to the same state.
pub struct Store<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.get_state();
        f.debug_struct("Store")
            .field("ready_state", &state.ready_state)
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl<T> Store<T> {
    /// Creates a store in the [`ReadyState::Closed`] state with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(Arc::new(Snapshot::default())),
                listeners: Arc::new(ListenerSet::default()),
            }),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn get_state(&self) -> Arc<Snapshot<T>> {
        self.shared.snapshot()
    }

    /// Merges `patch` into a new snapshot and notifies every listener.
    pub fn set_state(&self, patch: Patch<T>) {
        {
            let mut state = self
                .shared
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *state = Arc::new(state.merged(patch));
        }
        self.emit();
    }

    /// Resets the snapshot to `{ ready_state: Closed }` and notifies every listener.
    pub fn clear_store(&self) {
        self.shared.replace(Snapshot::default());
        self.emit();
    }

    /// Registers `listener`, to be called after every state change.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe_listener(Arc::new(listener))
    }

    /// Evaluates `selector` against the current snapshot.
    pub fn select<R, S>(&self, selector: S) -> R
    where
        S: FnOnce(&Snapshot<T>) -> R,
    {
        selector(&self.get_state())
    }

    /// Binds `selector` to this store for the `subscribe`/`get_snapshot`
    /// rendering contract.
    pub fn bind<R, S>(&self, selector: S) -> Binding<T, R>
    where
        S: Fn(&Snapshot<T>) -> R + Send + Sync + 'static,
    {
        Binding::new(self.clone(), selector)
    }

    /// Calls `on_change(&new, &old)` whenever the slice chosen by `selector`
    /// changes, as judged by [`PartialEq`].
    ///
    /// [`Data`] compares by identity, so a selector on `data` fires for every
    /// received message; plain values such as [`ReadyState`] compare by value.
    pub fn subscribe_with_selector<R, S, C>(&self, selector: S, on_change: C) -> Unsubscribe
    where
        T: Send + Sync + 'static,
        R: PartialEq + Clone + Send + 'static,
        S: Fn(&Snapshot<T>) -> R + Send + Sync + 'static,
        C: Fn(&R, &R) + Send + Sync + 'static,
    {
        self.subscribe_with_selector_by(selector, <R as PartialEq>::eq, on_change)
    }

    /// Like [`subscribe_with_selector`](Self::subscribe_with_selector), with a
    /// caller-supplied equality. Use [`Arc::ptr_eq`] for reference semantics.
    pub fn subscribe_with_selector_by<R, S, E, C>(
        &self,
        selector: S,
        eq: E,
        on_change: C,
    ) -> Unsubscribe
    where
        T: Send + Sync + 'static,
        R: Clone + Send + 'static,
        S: Fn(&Snapshot<T>) -> R + Send + Sync + 'static,
        E: Fn(&R, &R) -> bool + Send + Sync + 'static,
        C: Fn(&R, &R) + Send + Sync + 'static,
    {
        let initial = selector(&self.get_state());
        let listener = selector::on_change_listener(
            Arc::downgrade(&self.shared),
            initial,
            selector,
            eq,
            on_change,
        );
        self.subscribe_listener(listener)
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    pub(crate) fn subscribe_listener(&self, listener: Listener) -> Unsubscribe {
        let id = self.shared.listeners.insert(listener);
        Unsubscribe {
            id,
            listeners: Arc::downgrade(&self.shared.listeners),
        }
    }

    fn emit(&self) {
        for listener in self.shared.listeners.current() {
            listener();
        }
    }
}
