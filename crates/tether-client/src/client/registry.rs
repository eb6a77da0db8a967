// Subscription registry: address -> ordered handler entries, with
// server-interest announcement hooks.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tether_wire::Envelope;

use crate::Result;

/// Application callback for inbound messages on a registered address.
/// Returning `Err` (or panicking) routes to the paired error handler and
/// never past the dispatch boundary.
pub type MessageHandler = Arc<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;

/// Paired failure callback, invoked with the original message and the
/// captured error. Defaults to a no-op when not supplied.
pub type ErrorHandler = Arc<dyn Fn(&Envelope, &anyhow::Error) + Send + Sync>;

/// Identity token for one registered handler; the unregister key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub(crate) id: HandlerId,
    pub(crate) handler: MessageHandler,
    pub(crate) on_error: ErrorHandler,
}

pub(crate) fn noop_error_handler() -> ErrorHandler {
    Arc::new(|_, _| {})
}

/// Per-connection handler table. Mutation happens under the lock; dispatch
/// iterates over a snapshot so handlers never run while the lock is held.
pub(crate) struct Registry {
    entries: Mutex<HashMap<String, Vec<HandlerEntry>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a handler entry for `address`. `announce` is invoked (still
    /// under the lock, before the entry lands) only when the address has
    /// no local entries yet; its failure aborts the registration.
    pub(crate) fn register<F>(
        &self,
        address: &str,
        handler: MessageHandler,
        on_error: ErrorHandler,
        announce: F,
    ) -> Result<HandlerId>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut entries = self.entries.lock();
        let list = entries.entry(address.to_string()).or_default();
        if list.is_empty() {
            announce()?;
        }
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        list.push(HandlerEntry {
            id,
            handler,
            on_error,
        });
        Ok(id)
    }

    /// Remove the entry with `id` from `address`. A no-op when the address
    /// has no entries at all. Otherwise `announce` runs on every call,
    /// even when other entries remain afterwards; the bridge hears about
    /// every unregister, not just the last one.
    pub(crate) fn unregister<F>(&self, address: &str, id: HandlerId, announce: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut entries = self.entries.lock();
        let Some(list) = entries.get_mut(address) else {
            return Ok(());
        };
        if list.is_empty() {
            entries.remove(address);
            return Ok(());
        }
        announce()?;
        list.retain(|entry| entry.id != id);
        if list.is_empty() {
            entries.remove(address);
        }
        Ok(())
    }

    /// Stable copy of the entry list for `address`, in registration order.
    /// `None` when nothing is registered there.
    pub(crate) fn snapshot(&self, address: &str) -> Option<Vec<HandlerEntry>> {
        let entries = self.entries.lock();
        entries.get(address).filter(|list| !list.is_empty()).cloned()
    }
}
