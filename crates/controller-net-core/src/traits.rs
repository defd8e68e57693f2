//! The core never names `Request`, `Response` or `ControllerDataFrame`
//! directly — per §1 those are opaque, externally-owned payload types. It
//! only needs the three narrow contracts below, so any wire format can be
//! plugged in by implementing them (see `controller-net-protocol` for the
//! concrete implementation this workspace ships).

use crate::{connection_id::ConnectionId, error::CodecError};

/// A request body the session can hand to the external request handler.
pub trait DecodeRequest: Sized {
    fn decode(body: &[u8]) -> Result<Self, CodecError>;
}

/// Anything the core can serialise onto the wire as-is (a response body or
/// a telemetry dataframe body).
pub trait EncodeBody {
    fn encode(&self) -> Vec<u8>;
}

/// The subset of `Response`'s shape the core must construct itself: the
/// unsolicited `CONNECTION_INFO` notification (§6) and the `request_id =
/// -1` notifications sent via `send_notification`/`broadcast_notification`
/// (§4.5).
pub trait Notification: EncodeBody {
    /// Builds the first stream message sent to a newly accepted session.
    fn connection_info(id: ConnectionId) -> Self;

    /// Returns `self` with `request_id` forced to `-1`, marking it as a
    /// server-initiated notification rather than a reply to a request.
    fn into_notification(self) -> Self;
}
