// Inbound routing: registry fan-out first, then reply correlation, else
// drop. Handler failures stop at this boundary.
use std::panic::{self, AssertUnwindSafe};
use tether_wire::Envelope;

use crate::client::correlator::Correlator;
use crate::client::registry::{ErrorHandler, MessageHandler, Registry};

/// Route one decoded envelope. Holds no state of its own; the registry and
/// correlator are owned by the connection.
pub(crate) fn dispatch(registry: &Registry, correlator: &Correlator, envelope: &Envelope) {
    let Some(address) = envelope.address() else {
        // Failure-shape envelopes carry no routing key.
        tracing::debug!("dropping inbound envelope without an address");
        metrics::counter!("tether_client_inbound_dropped_total").increment(1);
        return;
    };

    if let Some(entries) = registry.snapshot(address) {
        for entry in &entries {
            invoke(&entry.handler, &entry.on_error, envelope);
        }
        metrics::counter!("tether_client_inbound_dispatched_total").increment(1);
        return;
    }

    if let Some(reply) = correlator.take(address) {
        invoke(&reply.handler, &reply.on_error, envelope);
        metrics::counter!("tether_client_inbound_dispatched_total").increment(1);
        return;
    }

    // Nobody interested; not an error.
    tracing::debug!(address, "no handler for inbound message");
    metrics::counter!("tether_client_inbound_dropped_total").increment(1);
}

// One guarded handler invocation. Errors and panics are captured and
// handed to the paired error handler; nothing propagates to the event
// loop or to sibling handlers.
fn invoke(handler: &MessageHandler, on_error: &ErrorHandler, envelope: &Envelope) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(envelope)));
    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(payload) => anyhow::anyhow!("handler panicked: {}", panic_message(&payload)),
    };
    metrics::counter!("tether_client_handler_failures_total").increment(1);
    tracing::debug!(error = %error, "handler failed, routing to error handler");
    // The error handler is application code too; guard it the same way.
    let _ = panic::catch_unwind(AssertUnwindSafe(|| on_error(envelope, &error)));
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
