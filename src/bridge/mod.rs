//! Native-messaging bridge to the browser extension.

pub mod framing;
pub mod host;
pub mod protocol;

pub use framing::{MAX_INBOUND_LEN, read_message, write_message};
pub use host::{BridgeHost, run_reader, run_writer, spawn_settings_forwarder};
pub use protocol::{CommandOp, Inbound, Outbound, Reply};

/// Buffer size of the outbound message channel.
pub const OUTBOUND_CAPACITY: usize = 256;
