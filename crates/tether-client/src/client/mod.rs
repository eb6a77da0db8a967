// Engine internals: façade, lifecycle state, routing and keep-alive.
pub(crate) mod bus;
pub(crate) mod correlator;
pub(crate) mod dispatcher;
pub(crate) mod heartbeat;
pub(crate) mod registry;
pub(crate) mod state;

pub use bus::{ConnectionListener, EventBus};
pub use registry::{ErrorHandler, HandlerId, MessageHandler};
pub use state::ConnectionState;
