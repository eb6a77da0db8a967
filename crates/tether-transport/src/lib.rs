// Transport seam: the command/event contract between the bridge engine
// and an externally supplied bitstream transport.
//
// The engine never touches sockets. It writes `TransportCommand`s into one
// half of a pipe and reads `TransportEvent`s from the other; a concrete
// transport (WebSocket, TCP, in-memory) runs its own driver task servicing
// the command stream and emitting events. Framing and TLS are entirely the
// transport's business.
use bytes::Bytes;
use tokio::sync::mpsc;

/// Instructions the engine issues to the transport.
#[derive(Debug)]
pub enum TransportCommand {
    /// Begin establishing the connection.
    Connect,
    /// Ship one opaque binary frame to the peer.
    Send(Bytes),
    /// Ask the peer to close; a `Closed` event confirms.
    Close,
}

/// Signals the transport delivers back to the engine.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established.
    Connected,
    /// Connection establishment failed.
    ConnectFailed { reason: String },
    /// One binary frame arrived from the peer.
    Frame(Bytes),
    /// The connection is gone: close confirmed or the peer disconnected.
    Closed,
}

/// The engine's half of the transport pipe.
///
/// ```
/// use tether_transport::TransportCommand;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (pipe, mut endpoints) = tether_transport::pipe(16);
/// pipe.commands.try_send(TransportCommand::Connect).expect("enqueue");
/// assert!(matches!(
///     endpoints.commands.recv().await,
///     Some(TransportCommand::Connect)
/// ));
/// # }
/// ```
pub struct TransportPipe {
    pub commands: mpsc::Sender<TransportCommand>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// The transport's half: where a concrete driver reads commands and
/// publishes events.
pub struct TransportEndpoints {
    pub commands: mpsc::Receiver<TransportCommand>,
    pub events: mpsc::Sender<TransportEvent>,
}

/// Create a connected pipe pair with bounded queues of `depth`.
pub fn pipe(depth: usize) -> (TransportPipe, TransportEndpoints) {
    let (command_tx, command_rx) = mpsc::channel(depth);
    let (event_tx, event_rx) = mpsc::channel(depth);
    (
        TransportPipe {
            commands: command_tx,
            events: event_rx,
        },
        TransportEndpoints {
            commands: command_rx,
            events: event_tx,
        },
    )
}

pub mod memory {
    //! Loss-free in-process transport used by tests and demos.
    use super::*;

    enum ConnectPolicy {
        Accept,
        Refuse(String),
    }

    /// The far side of an in-memory link: what a bridge server would see.
    pub struct MemoryLink {
        from_client: mpsc::Receiver<Bytes>,
        events: mpsc::Sender<TransportEvent>,
    }

    impl MemoryLink {
        /// Next frame the engine shipped, in order. `None` once the link
        /// driver has shut down and drained.
        pub async fn next_frame(&mut self) -> Option<Bytes> {
            self.from_client.recv().await
        }

        /// Deliver one inbound frame to the engine.
        pub async fn deliver(&self, frame: Bytes) {
            let _ = self.events.send(TransportEvent::Frame(frame)).await;
        }

        /// Drop the connection from the far side.
        pub async fn disconnect(&self) {
            let _ = self.events.send(TransportEvent::Closed).await;
        }
    }

    /// In-memory link that accepts the connect handshake.
    ///
    /// Must be called within a tokio runtime; the link driver is a spawned
    /// task.
    pub fn link(depth: usize) -> (TransportPipe, MemoryLink) {
        link_with_policy(depth, ConnectPolicy::Accept)
    }

    /// In-memory link that refuses every connect with `reason`.
    pub fn refusing_link(depth: usize, reason: impl Into<String>) -> (TransportPipe, MemoryLink) {
        link_with_policy(depth, ConnectPolicy::Refuse(reason.into()))
    }

    fn link_with_policy(depth: usize, policy: ConnectPolicy) -> (TransportPipe, MemoryLink) {
        let (pipe, endpoints) = super::pipe(depth);
        let (frame_tx, frame_rx) = mpsc::channel(depth);
        let events = endpoints.events.clone();
        tokio::spawn(run_link_driver(endpoints, frame_tx, policy));
        (
            pipe,
            MemoryLink {
                from_client: frame_rx,
                events,
            },
        )
    }

    async fn run_link_driver(
        mut endpoints: TransportEndpoints,
        frames: mpsc::Sender<Bytes>,
        policy: ConnectPolicy,
    ) {
        let mut connected = false;
        while let Some(command) = endpoints.commands.recv().await {
            match command {
                TransportCommand::Connect => match &policy {
                    ConnectPolicy::Accept => {
                        connected = true;
                        if endpoints.events.send(TransportEvent::Connected).await.is_err() {
                            break;
                        }
                    }
                    ConnectPolicy::Refuse(reason) => {
                        let event = TransportEvent::ConnectFailed {
                            reason: reason.clone(),
                        };
                        let _ = endpoints.events.send(event).await;
                        // A refused connect is terminal for this link.
                        break;
                    }
                },
                TransportCommand::Send(frame) => {
                    if !connected {
                        tracing::debug!("memory link dropped frame, not connected");
                        continue;
                    }
                    if frames.send(frame).await.is_err() {
                        break;
                    }
                }
                TransportCommand::Close => {
                    // Confirm immediately: the in-memory peer has nothing to flush.
                    let _ = endpoints.events.send(TransportEvent::Closed).await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_connects_and_carries_frames_both_ways() {
        let (mut pipe, mut link) = memory::link(16);

        pipe.commands
            .send(TransportCommand::Connect)
            .await
            .expect("connect");
        assert!(matches!(
            pipe.events.recv().await,
            Some(TransportEvent::Connected)
        ));

        pipe.commands
            .send(TransportCommand::Send(Bytes::from_static(b"out")))
            .await
            .expect("send");
        assert_eq!(link.next_frame().await, Some(Bytes::from_static(b"out")));

        link.deliver(Bytes::from_static(b"in")).await;
        match pipe.events.recv().await {
            Some(TransportEvent::Frame(frame)) => assert_eq!(frame, Bytes::from_static(b"in")),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_is_confirmed_and_stops_the_driver() {
        let (mut pipe, mut link) = memory::link(16);

        pipe.commands
            .send(TransportCommand::Connect)
            .await
            .expect("connect");
        assert!(matches!(
            pipe.events.recv().await,
            Some(TransportEvent::Connected)
        ));

        pipe.commands
            .send(TransportCommand::Close)
            .await
            .expect("close");
        assert!(matches!(
            pipe.events.recv().await,
            Some(TransportEvent::Closed)
        ));
        // Driver gone: the frame stream drains to None.
        assert_eq!(link.next_frame().await, None);
    }

    #[tokio::test]
    async fn refusing_link_reports_the_reason() {
        let (mut pipe, _link) = memory::refusing_link(16, "no route to bridge");

        pipe.commands
            .send(TransportCommand::Connect)
            .await
            .expect("connect");
        match pipe.events.recv().await {
            Some(TransportEvent::ConnectFailed { reason }) => {
                assert_eq!(reason, "no route to bridge");
            }
            other => panic!("expected connect failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_before_connect_are_dropped() {
        let (mut pipe, mut link) = memory::link(16);

        pipe.commands
            .send(TransportCommand::Send(Bytes::from_static(b"early")))
            .await
            .expect("send");
        pipe.commands
            .send(TransportCommand::Connect)
            .await
            .expect("connect");
        assert!(matches!(
            pipe.events.recv().await,
            Some(TransportEvent::Connected)
        ));
        pipe.commands
            .send(TransportCommand::Send(Bytes::from_static(b"after")))
            .await
            .expect("send");
        // Only the post-connect frame survives.
        assert_eq!(link.next_frame().await, Some(Bytes::from_static(b"after")));
    }

    #[tokio::test]
    async fn far_side_disconnect_surfaces_as_closed() {
        let (mut pipe, link) = memory::link(16);

        pipe.commands
            .send(TransportCommand::Connect)
            .await
            .expect("connect");
        assert!(matches!(
            pipe.events.recv().await,
            Some(TransportEvent::Connected)
        ));

        link.disconnect().await;
        assert!(matches!(
            pipe.events.recv().await,
            Some(TransportEvent::Closed)
        ));
    }
}
