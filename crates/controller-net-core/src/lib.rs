//! Connection registry, framed session state machine, UDP pairing channel
//! and the single-threaded poll driver behind the telemetry/RPC network
//! core. Protocol-agnostic: see `traits.rs` for the three contracts a wire
//! format must implement to plug in.

mod codec;
mod connection_id;
mod driver;
mod error;
mod registry;
mod scheduler;
mod session;
mod sockopt;
mod traits;
mod udp_channel;

pub use codec::{HEADER_SIZE, MAX_DATA_FRAME_MESSAGE_SIZE, MAX_MESSAGE_SIZE};
pub use connection_id::ConnectionId;
pub use driver::{DriverConfig, EventLoop};
pub use error::CodecError;
pub use registry::ConnRegistry;
pub use session::Session;
pub use traits::{DecodeRequest, EncodeBody, Notification};
