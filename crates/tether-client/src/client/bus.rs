// Connection façade and the transport event loop.
//
// All shared state hangs off one `Shared` value owned by this connection:
// the registry, the correlator, the heartbeat and the state cell are never
// shared across connections. Façade calls may come from any task or
// thread; wire writes funnel through the bounded transport command queue.
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tether_transport::{TransportCommand, TransportEvent, TransportPipe};
use tether_wire::{Envelope, Headers};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use uuid::Uuid;

use crate::client::correlator::{Correlator, PendingReply};
use crate::client::dispatcher::dispatch;
use crate::client::heartbeat::Heartbeat;
use crate::client::registry::{
    noop_error_handler, ErrorHandler, HandlerId, MessageHandler, Registry,
};
use crate::client::state::ConnectionState;
use crate::config::ClientConfig;
use crate::{Error, Result};

/// Single-slot connection listener; a later registration replaces the
/// earlier one.
pub type ConnectionListener = Arc<dyn Fn() + Send + Sync>;

/// Client façade for one bridge connection.
///
/// Constructed over a transport pipe, opened once, closed once. Send-type
/// operations require the open state and fail fast otherwise, without any
/// wire traffic or registry mutation.
pub struct EventBus {
    shared: Arc<Shared>,
}

struct Shared {
    state: RwLock<ConnectionState>,
    state_watch: watch::Sender<ConnectionState>,
    commands: mpsc::Sender<TransportCommand>,
    registry: Registry,
    correlator: Correlator,
    heartbeat: Heartbeat,
    config: ClientConfig,
    on_open: Mutex<Option<ConnectionListener>>,
    on_close: Mutex<Option<ConnectionListener>>,
    connect_failure: Mutex<Option<String>>,
}

impl EventBus {
    /// Wire the façade over `pipe` and spawn the event loop. Must run
    /// within a tokio runtime.
    pub fn new(pipe: TransportPipe, config: ClientConfig) -> Self {
        let TransportPipe { commands, events } = pipe;
        let (state_watch, _) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Connecting),
            state_watch,
            commands,
            registry: Registry::new(),
            correlator: Correlator::new(),
            heartbeat: Heartbeat::new(),
            config,
            on_open: Mutex::new(None),
            on_close: Mutex::new(None),
            connect_failure: Mutex::new(None),
        });
        tokio::spawn(run_event_loop(Arc::clone(&shared), events));
        Self { shared }
    }

    /// Ask the transport to connect and resolve once the connection is
    /// open. Fails with [`Error::Connect`] when the transport reports a
    /// connection failure. A second `open` is not rejected here; whether
    /// it means anything is up to the transport.
    pub async fn open(&self) -> Result<()> {
        let mut state_rx = self.shared.state_watch.subscribe();
        self.enqueue_command(TransportCommand::Connect)?;
        loop {
            match *state_rx.borrow_and_update() {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Closed => {
                    let reason = self
                        .shared
                        .connect_failure
                        .lock()
                        .clone()
                        .unwrap_or_else(|| "connection closed before open".to_string());
                    return Err(Error::Connect(reason));
                }
                ConnectionState::Connecting | ConnectionState::Closing => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(Error::ChannelClosed);
            }
        }
    }

    /// Blocking variant of [`open`](Self::open) for non-async callers.
    /// Must not be called from inside the runtime driving this client.
    pub fn open_blocking(&self) -> Result<()> {
        futures::executor::block_on(self.open())
    }

    /// Move toward closed: stop the heartbeat now, tell the transport to
    /// close. The close listener fires once the transport confirms.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.write();
            match *state {
                ConnectionState::Connecting | ConnectionState::Open => {
                    *state = ConnectionState::Closing;
                }
                ConnectionState::Closing | ConnectionState::Closed => return,
            }
        }
        self.shared
            .state_watch
            .send_replace(ConnectionState::Closing);
        self.shared.heartbeat.stop();
        if self
            .shared
            .commands
            .try_send(TransportCommand::Close)
            .is_err()
        {
            tracing::warn!("transport command queue rejected close");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Replace the open listener. Invoked from the task observing the
    /// transport's connected event.
    pub fn on_open(&self, listener: impl Fn() + Send + Sync + 'static) {
        *self.shared.on_open.lock() = Some(Arc::new(listener));
    }

    /// Replace the close listener. Invoked exactly once, when the
    /// connection reaches its terminal state.
    pub fn on_close(&self, listener: impl Fn() + Send + Sync + 'static) {
        *self.shared.on_close.lock() = Some(Arc::new(listener));
    }

    /// Point-to-point send without reply correlation.
    pub fn send(
        &self,
        address: &str,
        body: Option<String>,
        headers: Option<Headers>,
    ) -> Result<()> {
        self.send_envelope(Envelope::send(address, body, headers))
    }

    /// Point-to-point send expecting a reply. A fresh correlation address
    /// is generated, attached as the envelope's reply address, and the
    /// handler pair is parked until the reply arrives; the reply is
    /// delivered at most once.
    pub fn request(
        &self,
        address: &str,
        body: Option<String>,
        headers: Option<Headers>,
        reply_handler: MessageHandler,
        error_handler: Option<ErrorHandler>,
    ) -> Result<()> {
        let state = self.shared.state.read();
        if *state != ConnectionState::Open {
            return Err(Error::NotOpen(*state));
        }
        let correlation_address = Uuid::new_v4().to_string();
        let envelope = Envelope::send_with_reply(
            address,
            body,
            headers,
            correlation_address.clone(),
        );
        let frame = self.shared.config.codec.encode(&envelope).map_err(Error::Encode)?;
        self.shared.correlator.insert(
            correlation_address.clone(),
            PendingReply {
                handler: reply_handler,
                on_error: error_handler.unwrap_or_else(noop_error_handler),
            },
        );
        if let Err(error) = self.enqueue_command(TransportCommand::Send(frame)) {
            // Never leave a pending entry for a frame that was not sent.
            self.shared.correlator.remove(&correlation_address);
            return Err(error);
        }
        Ok(())
    }

    /// Broadcast to every consumer of `address`.
    pub fn publish(
        &self,
        address: &str,
        body: Option<String>,
        headers: Option<Headers>,
    ) -> Result<()> {
        self.send_envelope(Envelope::publish(address, body, headers))
    }

    /// Subscribe a handler to `address`. The first local handler for an
    /// address announces the interest to the bridge with a `register`
    /// envelope; further handlers fan out locally without extra wire
    /// traffic. Returns the token for [`unregister_handler`](Self::unregister_handler).
    pub fn register_handler(
        &self,
        address: &str,
        headers: Option<Headers>,
        handler: MessageHandler,
        error_handler: Option<ErrorHandler>,
    ) -> Result<HandlerId> {
        let state = self.shared.state.read();
        if *state != ConnectionState::Open {
            return Err(Error::NotOpen(*state));
        }
        self.shared.registry.register(
            address,
            handler,
            error_handler.unwrap_or_else(noop_error_handler),
            || {
                let envelope = Envelope::register(address, headers);
                let frame = self.shared.config.codec.encode(&envelope).map_err(Error::Encode)?;
                self.enqueue_command(TransportCommand::Send(frame))
            },
        )
    }

    /// Remove one handler entry. A no-op when nothing is registered for
    /// `address`; otherwise an `unregister` envelope goes to the bridge on
    /// every call, even while other local handlers keep the fan-out alive.
    /// The bridge may thus be told interest is gone while local delivery
    /// continues; existing bridge servers expect exactly this traffic.
    pub fn unregister_handler(
        &self,
        address: &str,
        headers: Option<Headers>,
        id: HandlerId,
    ) -> Result<()> {
        let state = self.shared.state.read();
        if *state != ConnectionState::Open {
            return Err(Error::NotOpen(*state));
        }
        self.shared.registry.unregister(address, id, || {
            let envelope = Envelope::unregister(address, headers);
            let frame = self.shared.config.codec.encode(&envelope).map_err(Error::Encode)?;
            self.enqueue_command(TransportCommand::Send(frame))
        })
    }

    // State gate plus encode plus enqueue for the fire-and-forget shapes.
    // The read guard spans the check and the enqueue so a concurrent close
    // cannot slip a frame past its own transition.
    fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        let state = self.shared.state.read();
        if *state != ConnectionState::Open {
            return Err(Error::NotOpen(*state));
        }
        let frame = self.shared.config.codec.encode(&envelope).map_err(Error::Encode)?;
        self.enqueue_command(TransportCommand::Send(frame))
    }

    fn enqueue_command(&self, command: TransportCommand) -> Result<()> {
        self.shared.commands.try_send(command).map_err(|error| match error {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Closed(_) => Error::ChannelClosed,
        })
    }
}

impl Shared {
    // Forward-only state transition; returns whether it took effect.
    fn transition(&self, next: ConnectionState) -> bool {
        {
            let mut state = self.state.write();
            if !state.can_advance_to(next) {
                return false;
            }
            *state = next;
        }
        self.state_watch.send_replace(next);
        true
    }

    fn notify(slot: &Mutex<Option<ConnectionListener>>) {
        // Clone the slot out first; a listener may re-enter the façade.
        let listener = slot.lock().clone();
        if let Some(listener) = listener {
            listener();
        }
    }
}

async fn run_event_loop(shared: Arc<Shared>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                if shared.transition(ConnectionState::Open) {
                    shared
                        .heartbeat
                        .start(shared.commands.clone(), shared.config.ping_interval);
                    tracing::debug!("bridge connection open");
                    Shared::notify(&shared.on_open);
                }
            }
            TransportEvent::ConnectFailed { reason } => {
                tracing::debug!(reason = %reason, "bridge connect failed");
                *shared.connect_failure.lock() = Some(reason);
                shared.heartbeat.stop();
                // Terminal, but without the close listener: the
                // connection never opened.
                shared.transition(ConnectionState::Closed);
                break;
            }
            TransportEvent::Frame(frame) => match shared.config.codec.decode(&frame) {
                Ok(envelope) => dispatch(&shared.registry, &shared.correlator, &envelope),
                Err(error) => {
                    metrics::counter!("tether_client_inbound_decode_errors_total").increment(1);
                    tracing::warn!(error = %error, "dropping undecodable inbound frame");
                }
            },
            TransportEvent::Closed => {
                shared.heartbeat.stop();
                if shared.transition(ConnectionState::Closed) {
                    tracing::debug!("bridge connection closed");
                    Shared::notify(&shared.on_close);
                }
                break;
            }
        }
    }
    // Transport gone without a close event: force the terminal state so
    // no waiter hangs and the timer is released.
    shared.heartbeat.stop();
    if shared.transition(ConnectionState::Closed) {
        Shared::notify(&shared.on_close);
    }
}
