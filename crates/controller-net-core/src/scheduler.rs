//! Datagram fairness scheduler (§4.4).
//!
//! Every poll tick the driver asks the scheduler to start at most one
//! telemetry write. Sessions are visited starting from a rotating cursor
//! rather than always from the front of the registry, so a session with a
//! constant backlog cannot starve everyone after it — the spec allows
//! either a fixed front-to-back scan or this rotation, and rotation is the
//! one that keeps later connections from going hungry under sustained load.

use mio::Registry;

use crate::{
    codec::pack,
    connection_id::ConnectionId,
    registry::ConnRegistry,
    udp_channel::{TelemetrySendOutcome, UdpChannel},
};

pub struct DatagramScheduler {
    cursor: usize,
}

impl DatagramScheduler {
    pub fn new() -> Self {
        Self { cursor: 0 }
    }

    /// Visits sessions starting at the cursor, advancing it past whichever
    /// session is inspected last, and tries to start exactly one datagram
    /// write. Returns once a write is started (`Sent` synchronously or
    /// `Queued` behind the socket), once the channel is already busy, or
    /// once every session has been checked with nothing to send.
    pub fn run_one_tick(
        &mut self,
        registry: &mio::Registry,
        conns: &mut ConnRegistry,
        udp: &mut UdpChannel,
    ) {
        if udp.is_write_inflight() {
            return;
        }
        let ids = conns.ids();
        if ids.is_empty() {
            return;
        }
        self.cursor %= ids.len();
        for offset in 0..ids.len() {
            let idx = (self.cursor + offset) % ids.len();
            let id = ids[idx];
            if self.try_start_one(registry, conns, udp, id) {
                self.cursor = (idx + 1) % ids.len();
                return;
            }
        }
    }

    /// Attempts to start a datagram write for a single session. Returns
    /// `true` iff a write was actually started (synchronously sent or
    /// queued), which is what ends the scheduler's pass for this tick.
    fn try_start_one(
        &self,
        registry: &Registry,
        conns: &mut ConnRegistry,
        udp: &mut UdpChannel,
        id: ConnectionId,
    ) -> bool {
        let Some(session) = conns.get_mut(id) else { return false };
        if session.is_stopped() || session.udp_write_inflight() {
            return false;
        }
        let Some(peer) = session.udp_peer() else { return false };
        let max_len = u32::from(session.max_data_frame_size());

        loop {
            let Some(body) = session.peek_dataframe() else { return false };
            let framed = match pack(&body, max_len) {
                Ok(framed) => framed,
                Err(_) => {
                    session.drop_oversized_dataframe();
                    continue;
                }
            };
            return match udp.send_telemetry(peer, id, framed, registry) {
                TelemetrySendOutcome::Sent => {
                    session.dataframe_send_completed();
                    true
                }
                TelemetrySendOutcome::Queued => {
                    session.dataframe_send_started();
                    true
                }
                TelemetrySendOutcome::Failed => {
                    session.stop(registry);
                    false
                }
            };
        }
    }
}

impl Default for DatagramScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{TcpListener, TcpStream as StdTcpStream, UdpSocket as StdUdpSocket},
        time::Duration,
    };

    use mio::{Token, net::{TcpStream, UdpSocket}};

    use super::*;

    fn session_with_peer(poll: &mio::Poll, conns: &mut ConnRegistry) -> (ConnectionId, StdUdpSocket) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, peer_addr) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        drop(client);

        let id = conns.insert(poll.registry(), TcpStream::from_std(server), peer_addr, 4096, 1400).unwrap();

        let udp_peer = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        udp_peer.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let udp_peer_addr = udp_peer.local_addr().unwrap();
        conns.get_mut(id).unwrap().bind_udp_peer(udp_peer_addr);
        (id, udp_peer)
    }

    fn recv_tag(socket: &StdUdpSocket) -> u8 {
        let mut buf = [0u8; 16];
        let (n, _) = socket.recv_from(&mut buf).unwrap();
        assert_eq!(n, crate::codec::HEADER_SIZE + 1, "expected a one-byte tagged dataframe");
        buf[crate::codec::HEADER_SIZE]
    }

    #[test]
    fn rotates_across_sessions_in_round_robin_order() {
        let poll = mio::Poll::new().unwrap();
        let mut conns = ConnRegistry::new();
        let mut udp = UdpChannel::new(UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap(), Token(0));
        udp.register(poll.registry()).unwrap();
        let mut scheduler = DatagramScheduler::new();

        let (id0, peer0) = session_with_peer(&poll, &mut conns);
        let (id1, peer1) = session_with_peer(&poll, &mut conns);

        // Both sessions have a backlog; the cursor starts at 0, so session 0
        // is serviced first and the cursor advances past it.
        conns.get_mut(id0).unwrap().enqueue_dataframe(vec![0]);
        conns.get_mut(id1).unwrap().enqueue_dataframe(vec![1]);
        scheduler.run_one_tick(poll.registry(), &mut conns, &mut udp);
        assert_eq!(recv_tag(&peer0), 0);

        // Session 1 still has a backlog; the rotated cursor visits it next,
        // not session 0 again.
        scheduler.run_one_tick(poll.registry(), &mut conns, &mut udp);
        assert_eq!(recv_tag(&peer1), 1);

        // Both drained: a fresh backlog on session 0 alone is still served.
        conns.get_mut(id0).unwrap().enqueue_dataframe(vec![0]);
        scheduler.run_one_tick(poll.registry(), &mut conns, &mut udp);
        assert_eq!(recv_tag(&peer0), 0);
    }

    #[test]
    fn idle_registry_is_a_no_op() {
        let poll = mio::Poll::new().unwrap();
        let mut conns = ConnRegistry::new();
        let mut udp = UdpChannel::new(UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap(), Token(0));
        udp.register(poll.registry()).unwrap();
        let mut scheduler = DatagramScheduler::new();

        scheduler.run_one_tick(poll.registry(), &mut conns, &mut udp);
        assert!(!udp.is_write_inflight());
    }
}
