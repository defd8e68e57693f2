//! Concrete `Request`/`Response`/`ControllerDataFrame` wire types. The core
//! (`controller-net-core`) never names these; it only needs the
//! `DecodeRequest`/`EncodeBody`/`Notification` contracts they implement
//! here, via `bitcode`'s serde integration.

use controller_net_core::{CodecError, ConnectionId, DecodeRequest, EncodeBody, Notification};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: i64,
    pub method: RequestMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestMethod {
    GetServiceVersion,
    GetControllerList,
    StartControllerDataStream { controller_id: i32 },
    StopControllerDataStream { controller_id: i32 },
    /// Escape hatch for request shapes this workspace doesn't model
    /// directly; the handler is free to reject these.
    Custom { name: String, payload: Vec<u8> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// §6: the unsolicited first message sent to every accepted session.
    ConnectionInfo { tcp_connection_id: u32 },
    ServiceVersion(String),
    ControllerList(Vec<i32>),
    Ack,
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: i64,
    pub result_code: ResultCode,
    pub payload: ResponsePayload,
}

impl DecodeRequest for Request {
    fn decode(body: &[u8]) -> Result<Self, CodecError> {
        bitcode::deserialize(body).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

impl EncodeBody for Response {
    fn encode(&self) -> Vec<u8> {
        bitcode::serialize(self).expect("Response always serializes")
    }
}

impl Notification for Response {
    /// §6: `request_id = -1`, `result_code = OK`, carrying the session's
    /// own id so the client can echo it back over the pairing datagram.
    fn connection_info(id: ConnectionId) -> Self {
        Response {
            request_id: -1,
            result_code: ResultCode::Ok,
            payload: ResponsePayload::ConnectionInfo { tcp_connection_id: id.as_u32() },
        }
    }

    fn into_notification(mut self) -> Self {
        self.request_id = -1;
        self
    }
}

/// High-rate controller telemetry sample (§6 datagram telemetry body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerDataFrame {
    pub controller_id: i32,
    pub sequence: u32,
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    pub buttons: u32,
}

impl EncodeBody for ControllerDataFrame {
    fn encode(&self) -> Vec<u8> {
        bitcode::serialize(self).expect("ControllerDataFrame always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_info_carries_the_session_id() {
        let response = Response::connection_info(ConnectionId::from_wire(7).unwrap());
        assert_eq!(response.request_id, -1);
        match response.payload {
            ResponsePayload::ConnectionInfo { tcp_connection_id } => assert_eq!(tcp_connection_id, 7),
            _ => panic!("expected ConnectionInfo payload"),
        }
    }

    #[test]
    fn into_notification_forces_request_id_to_negative_one() {
        let response = Response {
            request_id: 42,
            result_code: ResultCode::Ok,
            payload: ResponsePayload::Ack,
        };
        assert_eq!(response.into_notification().request_id, -1);
    }

    #[test]
    fn request_round_trips_through_bitcode() {
        let request =
            Request { request_id: 1, method: RequestMethod::StartControllerDataStream { controller_id: 0 } };
        let bytes = bitcode::serialize(&request).unwrap();
        let decoded = Request::decode(&bytes).unwrap();
        assert_eq!(decoded.request_id, 1);
        assert!(matches!(decoded.method, RequestMethod::StartControllerDataStream { controller_id: 0 }));
    }

    #[test]
    fn malformed_request_body_is_rejected() {
        assert!(Request::decode(&[0xff, 0xff, 0xff]).is_err());
    }
}
