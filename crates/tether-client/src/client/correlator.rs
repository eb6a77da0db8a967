// Reply correlator: one-shot handler pairs keyed by generated
// correlation addresses.
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::client::registry::{ErrorHandler, MessageHandler};

#[derive(Clone)]
pub(crate) struct PendingReply {
    pub(crate) handler: MessageHandler,
    pub(crate) on_error: ErrorHandler,
}

/// Pending reply table. Lookup and removal are one atomic step, so a
/// duplicate delivery to the same correlation address finds nothing.
pub(crate) struct Correlator {
    pending: Mutex<HashMap<String, PendingReply>>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, correlation_address: String, reply: PendingReply) {
        self.pending.lock().insert(correlation_address, reply);
    }

    /// Roll back an entry whose send never made it onto the wire.
    pub(crate) fn remove(&self, correlation_address: &str) {
        self.pending.lock().remove(correlation_address);
    }

    /// Consume the entry for `correlation_address`, if any. At most one
    /// caller ever gets it.
    pub(crate) fn take(&self, correlation_address: &str) -> Option<PendingReply> {
        self.pending.lock().remove(correlation_address)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}
