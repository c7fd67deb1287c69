//! Derived-value subscriptions.
//!
//! Two ways of consuming a slice of the [`Snapshot`]:
//!
//! - [`Store::subscribe_with_selector`] only calls back when the selected
//!   slice actually changes, so updates to unrelated fields cost nothing
//!   downstream.
//! - [`Binding`] implements [`ExternalStore`], the contract of a rendering
//!   layer that subscribes for raw change notifications and then polls
//!   `get_snapshot` synchronously between renders.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::{Listener, Shared, Snapshot, Store, Unsubscribe};

/// A synchronous external store as seen by a rendering layer.
///
/// The rendering layer registers a listener with [`subscribe`](Self::subscribe)
/// and, whenever it is told that something changed, calls
/// [`get_snapshot`](Self::get_snapshot) to read the value it renders.
pub trait ExternalStore {
    type Snapshot;

    fn subscribe(&self, listener: Listener) -> Unsubscribe;

    fn get_snapshot(&self) -> Self::Snapshot;
}

/// A selector bound to a [`Store`]. Created with [`Store::bind`].
pub struct Binding<T, R> {
    store: Store<T>,
    selector: Arc<dyn Fn(&Snapshot<T>) -> R + Send + Sync>,
}

impl<T, R> Binding<T, R> {
    pub(super) fn new<S>(store: Store<T>, selector: S) -> Self
    where
        S: Fn(&Snapshot<T>) -> R + Send + Sync + 'static,
    {
        Self {
            store,
            selector: Arc::new(selector),
        }
    }
}

impl<T, R> Clone for Binding<T, R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            selector: Arc::clone(&self.selector),
        }
    }
}

impl<T, R> fmt::Debug for Binding<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<T, R> ExternalStore for Binding<T, R> {
    type Snapshot = R;

    fn subscribe(&self, listener: Listener) -> Unsubscribe {
        self.store.subscribe_listener(listener)
    }

    /// Recomputed on every call; nothing is cached.
    fn get_snapshot(&self) -> R {
        (self.selector)(&self.store.get_state())
    }
}

/// Builds the raw listener behind [`Store::subscribe_with_selector_by`].
///
/// The listener only holds a weak reference to the store, so a subscription
/// never keeps the store alive.
pub(super) fn on_change_listener<T, R, S, E, C>(
    shared: Weak<Shared<T>>,
    initial: R,
    selector: S,
    eq: E,
    on_change: C,
) -> Listener
where
    T: Send + Sync + 'static,
    R: Clone + Send + 'static,
    S: Fn(&Snapshot<T>) -> R + Send + Sync + 'static,
    E: Fn(&R, &R) -> bool + Send + Sync + 'static,
    C: Fn(&R, &R) + Send + Sync + 'static,
{
    let current = Mutex::new(initial);

    Arc::new(move || {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let next = selector(&shared.snapshot());

        // The lock is released before `on_change` runs, which may touch the store again.
        let previous = {
            let mut current = current.lock().unwrap_or_else(PoisonError::into_inner);
            if eq(&current, &next) {
                return;
            }
            std::mem::replace(&mut *current, next.clone())
        };

        on_change(&next, &previous);
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::{ErrorInfo, Patch, Payload, ReadyState};

    type Changes<R> = Arc<Mutex<Vec<(R, R)>>>;

    fn record<R>(store: &Store<u32>, selector: fn(&Snapshot<u32>) -> R) -> (Changes<R>, Unsubscribe)
    where
        R: PartialEq + Clone + Send + 'static,
    {
        let changes: Changes<R> = Arc::new(Mutex::new(Vec::new()));
        let changes_clone = Arc::clone(&changes);
        let handle = store.subscribe_with_selector(selector, move |next: &R, previous: &R| {
            changes_clone
                .lock()
                .unwrap()
                .push((next.clone(), previous.clone()));
        });
        (changes, handle)
    }

    #[test]
    fn on_change_fires_only_when_slice_changes() {
        let store: Store<u32> = Store::new();
        let (changes, _handle) = record(&store, |s| s.ready_state);

        store.set_state(Patch::new().ready_state(ReadyState::Connecting));
        store.set_state(Patch::new().ready_state(ReadyState::Connecting));
        store.set_state(Patch::new().data(Payload::Json(5)));
        store.set_state(Patch::new().ready_state(ReadyState::Open));

        assert_eq!(
            *changes.lock().unwrap(),
            vec![
                (ReadyState::Connecting, ReadyState::Closed),
                (ReadyState::Open, ReadyState::Connecting),
            ]
        );
    }

    #[test]
    fn constant_projection_never_fires() {
        let store: Store<u32> = Store::new();
        let (changes, _handle) = record(&store, |_| "constant");

        store.set_state(Patch::new().ready_state(ReadyState::Open));
        store.set_state(Patch::new().data(Payload::Json(1)));
        store.clear_store();

        assert!(changes.lock().unwrap().is_empty(), "constant slice must not notify");
    }

    #[test]
    fn error_only_update_notifies_neither_state_nor_data() {
        let store: Store<u32> = Store::new();
        store.set_state(
            Patch::new()
                .ready_state(ReadyState::Open)
                .data(Payload::Json(1)),
        );
        let (state_changes, _state) = record(&store, |s| s.ready_state);
        let (data_changes, _data) = record(&store, |s| s.data.clone());

        store.set_state(Patch::new().error(ErrorInfo::new("transport hiccup")));

        assert!(state_changes.lock().unwrap().is_empty(), "ready_state untouched");
        assert!(data_changes.lock().unwrap().is_empty(), "data untouched");
    }

    #[test]
    fn data_selector_fires_for_every_message() {
        let store: Store<u32> = Store::new();
        let (changes, _handle) = record(&store, |s| s.data.clone());

        store.set_state(Patch::new().data(Payload::Json(1)));
        store.set_state(Patch::new().data(Payload::Json(1)));
        store.set_state(Patch::new().ready_state(ReadyState::Open));

        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].0.as_deref(), Some(&Payload::Json(1)));
    }

    #[test]
    fn custom_equality_can_compare_payload_values() {
        let store: Store<u32> = Store::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let _handle = store.subscribe_with_selector_by(
            |s| s.data.clone(),
            |a, b| a.as_deref() == b.as_deref(),
            move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        store.set_state(Patch::new().data(Payload::Json(1)));
        store.set_state(Patch::new().data(Payload::Json(1)));
        store.set_state(Patch::new().data(Payload::Json(2)));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribed_selector_stops_firing() {
        let store: Store<u32> = Store::new();
        let (changes, handle) = record(&store, |s| s.ready_state);

        handle.unsubscribe();
        store.set_state(Patch::new().ready_state(ReadyState::Open));

        assert!(changes.lock().unwrap().is_empty(), "no calls after unsubscribe");
    }

    #[test]
    fn binding_recomputes_on_every_read() {
        let store: Store<u32> = Store::new();
        let binding = store.bind(|s| s.json().copied());

        assert_eq!(binding.get_snapshot(), None);
        store.set_state(Patch::new().data(Payload::Json(3)));
        assert_eq!(binding.get_snapshot(), Some(3));
    }

    #[test]
    fn binding_drives_a_render_loop() {
        let store: Store<u32> = Store::new();
        let binding = store.bind(|s| s.ready_state.to_string());
        let rendered = Arc::new(Mutex::new(vec![binding.get_snapshot()]));

        let rendered_clone = Arc::clone(&rendered);
        let reader = binding.clone();
        let handle = binding.subscribe(Arc::new(move || {
            let next = reader.get_snapshot();
            let mut rendered = rendered_clone.lock().unwrap();
            if rendered.last() != Some(&next) {
                rendered.push(next);
            }
        }));

        store.set_state(Patch::new().ready_state(ReadyState::Connecting));
        store.set_state(Patch::new().error(ErrorInfo::new("ignored")));
        store.set_state(Patch::new().ready_state(ReadyState::Open));
        handle.unsubscribe();
        store.clear_store();

        assert_eq!(
            *rendered.lock().unwrap(),
            vec!["CLOSED", "CONNECTING", "OPEN"]
        );
    }

    #[test]
    fn subscription_does_not_keep_store_alive() {
        let store: Store<u32> = Store::new();
        let weak = Arc::downgrade(&store.shared);
        let (_changes, _handle) = record(&store, |s| s.ready_state);

        drop(store);

        assert!(weak.upgrade().is_none(), "store should be freed");
    }
}
