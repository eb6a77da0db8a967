// Keep-alive scheduler: one ping frame immediately on open, then one per
// interval, until stopped.
use bytes::Bytes;
use parking_lot::Mutex;
use std::time::Duration;
use tether_transport::TransportCommand;
use tether_wire::PING_FRAME;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

enum HeartbeatState {
    NotStarted,
    Running(JoinHandle<()>),
    Stopped,
}

/// Owner of the keep-alive task. `stop` is idempotent and safe to call
/// before any start; once stopped the heartbeat never restarts, matching
/// the forward-only connection lifecycle.
pub(crate) struct Heartbeat {
    state: Mutex<HeartbeatState>,
}

impl Heartbeat {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(HeartbeatState::NotStarted),
        }
    }

    pub(crate) fn start(&self, commands: mpsc::Sender<TransportCommand>, interval: Duration) {
        let mut state = self.state.lock();
        if !matches!(*state, HeartbeatState::NotStarted) {
            return;
        }
        let handle = tokio::spawn(run_heartbeat(commands, interval));
        *state = HeartbeatState::Running(handle);
    }

    pub(crate) fn stop(&self) {
        let mut state = self.state.lock();
        if let HeartbeatState::Running(handle) =
            std::mem::replace(&mut *state, HeartbeatState::Stopped)
        {
            handle.abort();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        // The timer is owned by this connection; never leak the task.
        self.stop();
    }
}

async fn run_heartbeat(commands: mpsc::Sender<TransportCommand>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        // First tick completes immediately, so a ping goes out at time 0.
        ticker.tick().await;
        let frame = Bytes::from_static(PING_FRAME);
        if commands.send(TransportCommand::Send(frame)).await.is_err() {
            break;
        }
    }
}
