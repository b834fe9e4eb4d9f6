use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Handle;

/// Callback invoked for every value the peripheral pushes on a subscribed
/// characteristic.
pub type NotifyCallback = Box<dyn FnMut(Handle, Vec<u8>) + Send + 'static>;

/// One active subscription. Values are queued to a delivery task that owns
/// the callback, so the event source never waits on caller code.
struct Subscription {
    id: u64,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    active: Arc<AtomicBool>,
    delivery: JoinHandle<()>,
}

impl Subscription {
    fn start(id: u64, handle: Handle, mut callback: NotifyCallback) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));

        let delivery = tokio::spawn({
            let active = active.clone();
            async move {
                while let Some(value) = receiver.recv().await {
                    // An abort only lands at the next yield point.
                    if !active.load(Ordering::Acquire) {
                        break;
                    }
                    callback(handle, value);
                }
            }
        });

        Self {
            id,
            sender,
            active,
            delivery,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Values still queued for the callback are dropped with the task.
        self.active.store(false, Ordering::Release);
        self.delivery.abort();
    }
}

/// Maps characteristic handles to at most one subscriber each.
#[derive(Default)]
pub(crate) struct NotificationRegistry {
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<Handle, Subscription>>,
}

impl NotificationRegistry {
    /// Register `callback` for `handle`, replacing any previous subscriber.
    /// Returns the id of the new subscription.
    pub(crate) fn insert(&self, handle: Handle, callback: NotifyCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Subscription::start(id, handle, callback);

        let replaced = self
            .subscriptions
            .lock()
            .unwrap()
            .insert(handle, subscription);
        if replaced.is_some() {
            log::debug!("Replaced subscriber of {}", handle);
        }
        id
    }

    pub(crate) fn remove(&self, handle: Handle) -> bool {
        self.subscriptions.lock().unwrap().remove(&handle).is_some()
    }

    /// Remove the subscription on `handle` only if it is still subscription `id`.
    pub(crate) fn remove_exact(&self, handle: Handle, id: u64) -> bool {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        match subscriptions.get(&handle) {
            Some(subscription) if subscription.id == id => {
                subscriptions.remove(&handle);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn contains(&self, handle: Handle) -> bool {
        self.subscriptions.lock().unwrap().contains_key(&handle)
    }

    /// Hand a value to the subscriber of `handle`, if any.
    pub(crate) fn dispatch(&self, handle: Handle, value: Vec<u8>) -> bool {
        match self.subscriptions.lock().unwrap().get(&handle) {
            Some(subscription) => subscription.sender.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop every subscription and return the handles that had one.
    pub(crate) fn clear(&self) -> Vec<Handle> {
        let drained: Vec<(Handle, Subscription)> =
            self.subscriptions.lock().unwrap().drain().collect();
        drained.into_iter().map(|(handle, _)| handle).collect()
    }

    pub(crate) fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.subscriptions.lock().unwrap().keys().copied().collect();
        handles.sort();
        handles
    }
}
