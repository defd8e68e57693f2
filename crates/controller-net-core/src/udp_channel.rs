//! UDP pairing and telemetry transport (§4.3, §6).
//!
//! One `mio::net::UdpSocket` serves both the pairing handshake and every
//! paired session's telemetry stream. The socket never has more than one
//! outstanding `send_to` in flight: a pairing ack that arrives while a
//! telemetry send is still draining queues behind it instead of racing it.

use std::{collections::VecDeque, io, net::SocketAddr};

use mio::{Interest, Registry, Token, net::UdpSocket};
use tracing::debug;

use crate::connection_id::ConnectionId;

/// A pairing request read off the wire: the client's claimed `ConnectionId`
/// and the address to reply to.
pub struct PairingRequest {
    pub from: SocketAddr,
    pub wire_id: i32,
}

enum PendingWrite {
    PairingAck { to: SocketAddr, body: [u8; 1] },
    Telemetry { to: SocketAddr, owner: ConnectionId, framed: Vec<u8> },
}

/// Outcome of handing a telemetry frame to the channel for sending.
#[derive(Debug, PartialEq, Eq)]
pub enum TelemetrySendOutcome {
    /// Sent synchronously; the session's in-flight flag should not be set.
    Sent,
    /// Queued behind the socket's single writer; in-flight until `on_writable`.
    Queued,
    /// The socket itself failed; the session's datagram path is unusable
    /// but this is not fatal to the TCP side.
    Failed,
}

pub struct UdpChannel {
    socket: UdpSocket,
    token: Token,
    queue: VecDeque<PendingWrite>,
    write_inflight: bool,
    writable_armed: bool,
}

impl UdpChannel {
    pub fn new(socket: UdpSocket, token: Token) -> Self {
        Self { socket, token, queue: VecDeque::new(), write_inflight: false, writable_armed: false }
    }

    pub(crate) fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.socket, self.token, Interest::READABLE)
    }

    pub fn is_write_inflight(&self) -> bool {
        self.write_inflight
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Reads every pairing datagram currently available. A datagram whose
    /// length is not exactly 4 bytes is logged and discarded; the socket
    /// stays armed for the next one (§13 open question decision).
    pub fn drain_pairing_requests(&mut self) -> Vec<PairingRequest> {
        let mut requests = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if n != 4 {
                        debug!(len = n, %from, "pairing datagram has unexpected length, dropping");
                        continue;
                    }
                    let wire_id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                    requests.push(PairingRequest { from, wire_id });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return requests,
                Err(err) => {
                    debug!(%err, "udp recv_from failed");
                    return requests;
                }
            }
        }
    }

    /// Queues (or sends immediately) the 1-byte pairing acknowledgement.
    pub fn send_pairing_ack(&mut self, to: SocketAddr, accepted: bool, registry: &Registry) {
        let body = [accepted as u8];
        if self.write_inflight {
            self.queue.push_back(PendingWrite::PairingAck { to, body });
            return;
        }
        match self.socket.send_to(&body, to) {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.queue.push_back(PendingWrite::PairingAck { to, body });
                self.write_inflight = true;
                self.arm_writable(registry);
            }
            Err(err) => debug!(%err, %to, "pairing ack send failed"),
        }
    }

    /// Attempts to send a pre-framed telemetry datagram. Must only be
    /// called by the scheduler when `is_write_inflight()` is false (§4.4):
    /// the scheduler is what enforces "first session wins this tick".
    pub fn send_telemetry(
        &mut self,
        to: SocketAddr,
        owner: ConnectionId,
        framed: Vec<u8>,
        registry: &Registry,
    ) -> TelemetrySendOutcome {
        controller_net_utils::safe_assert!(
            !self.write_inflight,
            "telemetry send attempted while a write was in flight"
        );
        match self.socket.send_to(&framed, to) {
            Ok(_) => TelemetrySendOutcome::Sent,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.queue.push_back(PendingWrite::Telemetry { to, owner, framed });
                self.write_inflight = true;
                self.arm_writable(registry);
                TelemetrySendOutcome::Queued
            }
            Err(err) => {
                debug!(%err, %to, owner = %owner, "telemetry send failed");
                TelemetrySendOutcome::Failed
            }
        }
    }

    /// Drains the queued writes built up while the socket was unwritable.
    /// `on_telemetry_result` lets the caller react to the owning session:
    /// clear `udp_write_inflight` and pop `dataframe_queue` on success
    /// (`true`), or `stop()` the session on a hard send failure (`false`) —
    /// §7 treats a datagram I/O error as fatal to the session.
    pub(crate) fn on_writable(
        &mut self,
        registry: &Registry,
        mut on_telemetry_result: impl FnMut(ConnectionId, bool),
    ) {
        while let Some(pending) = self.queue.pop_front() {
            let (to, bytes, owner): (SocketAddr, &[u8], Option<ConnectionId>) = match &pending {
                PendingWrite::PairingAck { to, body } => (*to, &body[..], None),
                PendingWrite::Telemetry { to, framed, owner, .. } => (*to, &framed[..], Some(*owner)),
            };
            match self.socket.send_to(bytes, to) {
                Ok(_) => {
                    self.write_inflight = false;
                    if let Some(owner) = owner {
                        on_telemetry_result(owner, true);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.queue.push_front(pending);
                    return;
                }
                Err(err) => {
                    debug!(%err, %to, "queued udp send failed, stopping owning session");
                    self.write_inflight = false;
                    if let Some(owner) = owner {
                        on_telemetry_result(owner, false);
                    }
                }
            }
        }
        self.disarm_writable(registry);
    }

    fn arm_writable(&mut self, registry: &Registry) {
        if self.writable_armed {
            return;
        }
        if registry
            .reregister(&mut self.socket, self.token, Interest::READABLE | Interest::WRITABLE)
            .is_ok()
        {
            self.writable_armed = true;
        }
    }

    fn disarm_writable(&mut self, registry: &Registry) {
        if !self.writable_armed {
            return;
        }
        if registry.reregister(&mut self.socket, self.token, Interest::READABLE).is_ok() {
            self.writable_armed = false;
        }
    }
}
