//! Cancellation signals.
//!
//! An `AbortController` owns the right to abort; any number of `AbortSignal`
//! clones can observe it. Listeners registered on a signal run exactly once,
//! synchronously, when it aborts. Controllers can be derived from another
//! signal so they abort along with it, which is how the actor tree propagates
//! shutdown from parents to children.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

type Listener = Box<dyn FnOnce() + Send>;

/// Identifies a listener so it can be removed before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

#[derive(Default)]
struct SignalState {
    aborted: bool,
    next_key: u64,
    listeners: Vec<(u64, Listener)>,
}

#[derive(Default)]
struct SignalInner {
    state: Mutex<SignalState>,
    notify: Notify,
}

impl SignalInner {
    /// Returns false if the signal was already aborted.
    fn abort(&self) -> bool {
        let listeners = {
            let mut state = self.state.lock();
            if state.aborted {
                return false;
            }
            state.aborted = true;
            std::mem::take(&mut state.listeners)
        };

        self.notify.notify_waiters();

        // Listeners run without the lock held, so they're free to register or
        // remove listeners on this signal, or abort other signals.
        for (_, listener) in listeners {
            listener();
        }
        true
    }

    fn remove_listener(&self, key: ListenerKey) {
        self.state.lock().listeners.retain(|(k, _)| *k != key.0);
    }
}

/// The observing half of an abort controller.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<SignalInner>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.inner.state.lock().aborted
    }

    /// Register `listener` to run once when the signal aborts. If the signal is
    /// already aborted, the listener runs immediately.
    pub fn add_listener<F>(&self, listener: F) -> ListenerKey
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        let key = state.next_key;
        state.next_key += 1;

        if state.aborted {
            drop(state);
            listener();
        } else {
            state.listeners.push((key, Box::new(listener)));
        }
        ListenerKey(key)
    }

    /// Register `listener`, and unregister it again if `until` aborts first.
    pub fn add_listener_until<F>(&self, listener: F, until: &AbortSignal) -> ListenerKey
    where
        F: FnOnce() + Send + 'static,
    {
        let key = self.add_listener(listener);
        let weak: Weak<SignalInner> = Arc::downgrade(&self.inner);
        until.add_listener(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_listener(key);
            }
        });
        key
    }

    pub fn remove_listener(&self, key: ListenerKey) {
        self.inner.remove_listener(key);
    }

    /// Wait until the signal aborts.
    pub async fn cancelled(&self) {
        // Subscribe before checking the flag, so an abort between the check
        // and the await isn't lost.
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Owns an abort signal and can trigger it.
#[derive(Debug)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            signal: AbortSignal {
                inner: Arc::new(SignalInner::default()),
            },
        }
    }

    /// Create a controller that also aborts when `parent` aborts. The parent
    /// only holds a weak reference, and the link is dropped if this controller
    /// aborts first.
    pub fn derived_from(parent: &AbortSignal) -> Self {
        let controller = Self::new();
        let child = Arc::downgrade(&controller.signal.inner);
        parent.add_listener_until(
            move || {
                if let Some(inner) = child.upgrade() {
                    inner.abort();
                }
            },
            &controller.signal,
        );
        controller
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort the signal. Returns false if it had already been aborted.
    pub fn abort(&self) -> bool {
        self.signal.inner.abort()
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}
