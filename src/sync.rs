//! Small synchronization building blocks shared by jobs and hooks.
//!
//! [`Latch`] is a value that resolves once and fans the result out to every
//! registered callback. [`wait_for_callback`] turns any "register a callback"
//! API into a blocking call through a per-waiter one-shot [`Signal`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Acquires `mutex` for the current scope.
///
/// A poisoned lock only means a callback panicked elsewhere; the protected
/// data is still consistent, so the guard is recovered instead of failing.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A boxed callback invoked at most once with the resolved value.
pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Why a [`Signal`] wait ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The deadline passed first.
    Timeout,
    /// The sending half was dropped without sending.
    Disconnected,
}

/// Sending half of a one-shot signal.
pub struct Notifier<T> {
    tx: SyncSender<T>,
}

impl<T> Notifier<T> {
    /// Delivers `value` to the waiting side. Sending after the receiver is
    /// gone is not an error; nobody is listening anymore.
    pub fn send(self, value: T) {
        let _ = self.tx.send(value);
    }
}

/// Receiving half of a one-shot signal carrying a value.
pub struct Signal<T> {
    rx: Receiver<T>,
}

impl<T> Signal<T> {
    /// Blocks until the value arrives. `None` when the notifier was dropped.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Blocks for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, WaitError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => WaitError::Timeout,
            RecvTimeoutError::Disconnected => WaitError::Disconnected,
        })
    }
}

/// Creates a connected one-shot pair.
pub fn signal<T>() -> (Notifier<T>, Signal<T>) {
    // One slot: the single send never blocks.
    let (tx, rx) = mpsc::sync_channel(1);
    (Notifier { tx }, Signal { rx })
}

/// Registers a callback through `register` and blocks until it fires.
pub fn wait_for_callback<T, R>(register: R) -> Option<T>
where
    T: Send + 'static,
    R: FnOnce(Callback<T>),
{
    let (notifier, signal) = signal();
    register(Box::new(move |value| notifier.send(value)));
    signal.wait()
}

enum Slot<T> {
    // Keyed so a timed-out waiter can withdraw its own callback.
    Pending(Vec<(u64, Callback<T>)>),
    Resolved(T),
}

/// A value that resolves exactly once.
///
/// Registration and resolution happen under the same lock, so a callback is
/// either queued before resolution or fired immediately afterwards, never
/// both. Callbacks always run after the lock is released.
pub struct Latch<T> {
    slot: Mutex<Slot<T>>,
    /// Key handed to the next queued callback.
    next_key: AtomicU64,
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending(Vec::new())),
            next_key: AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Send + 'static> Latch<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the latch and fires every queued callback.
    ///
    /// Returns `false` and leaves the stored value untouched when the latch
    /// was already resolved.
    pub fn resolve(&self, value: T) -> bool {
        let callbacks = {
            let mut slot = lock(&self.slot);
            match std::mem::replace(&mut *slot, Slot::Resolved(value.clone())) {
                Slot::Pending(callbacks) => callbacks,
                Slot::Resolved(previous) => {
                    *slot = Slot::Resolved(previous);
                    return false;
                }
            }
        };
        for (_, callback) in callbacks {
            callback(value.clone());
        }
        true
    }

    /// Queues `callback`, or runs it right away if already resolved.
    pub fn register(&self, callback: impl FnOnce(T) + Send + 'static) {
        if let Err((callback, value)) = self.enqueue(Box::new(callback)) {
            callback(value);
        }
    }

    /// Queues `callback` under a fresh key. Hands it back with the value
    /// when the latch is already resolved.
    fn enqueue(&self, callback: Callback<T>) -> Result<u64, (Callback<T>, T)> {
        let mut slot = lock(&self.slot);
        match &mut *slot {
            Slot::Pending(callbacks) => {
                let key = self.next_key.fetch_add(1, Ordering::Relaxed);
                callbacks.push((key, callback));
                Ok(key)
            }
            Slot::Resolved(value) => Err((callback, value.clone())),
        }
    }

    pub fn get(&self) -> Option<T> {
        match &*lock(&self.slot) {
            Slot::Pending(_) => None,
            Slot::Resolved(value) => Some(value.clone()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*lock(&self.slot), Slot::Resolved(_))
    }

    /// Number of callbacks still waiting for resolution.
    pub fn pending(&self) -> usize {
        match &*lock(&self.slot) {
            Slot::Pending(callbacks) => callbacks.len(),
            Slot::Resolved(_) => 0,
        }
    }

    /// Blocks until resolved. `None` only if the latch is torn down first,
    /// which cannot happen while `self` is borrowed.
    pub fn wait(&self) -> Option<T> {
        wait_for_callback(|callback| self.register(callback))
    }

    /// Blocks for at most `timeout`. On timeout the waiter's callback is
    /// withdrawn, so repeated polling leaves nothing behind.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, WaitError> {
        let (notifier, signal) = signal();
        let key = match self.enqueue(Box::new(move |value| notifier.send(value))) {
            Ok(key) => key,
            Err((_, value)) => return Ok(value),
        };
        match signal.wait_timeout(timeout) {
            Err(WaitError::Timeout) => {
                let mut slot = lock(&self.slot);
                match &mut *slot {
                    Slot::Pending(callbacks) => {
                        callbacks.retain(|(queued, _)| *queued != key);
                        Err(WaitError::Timeout)
                    }
                    // Resolved between the deadline and the lock.
                    Slot::Resolved(value) => Ok(value.clone()),
                }
            }
            other => other,
        }
    }
}
