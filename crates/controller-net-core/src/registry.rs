//! Connection registry (§3): `ConnectionId -> Session` with a stable
//! iteration order, used by the datagram scheduler (§4.4) and by shutdown
//! (§4.5) to reach every live session.

use std::collections::BTreeMap;

use mio::{Registry, net::TcpStream};

use crate::{connection_id::ConnectionId, session::Session};

/// Ids are assigned monotonically increasing and never reused, so a
/// `BTreeMap` keyed on `ConnectionId` gives us a stable, deterministic
/// iteration order (oldest connection first) for free, without a separate
/// insertion-order index.
pub struct ConnRegistry {
    sessions: BTreeMap<ConnectionId, Session>,
    next_id: u32,
}

impl ConnRegistry {
    pub fn new() -> Self {
        Self { sessions: BTreeMap::new(), next_id: 0 }
    }

    /// Allocates the next `ConnectionId`, wraps `stream` in a `Session`,
    /// registers it for readability and inserts it. Returns the new id.
    pub fn insert(
        &mut self,
        registry: &Registry,
        stream: TcpStream,
        peer_addr: std::net::SocketAddr,
        max_message_size: u32,
        max_data_frame_size: u16,
    ) -> std::io::Result<ConnectionId> {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        let mut session = Session::new(id, stream, peer_addr, max_message_size, max_data_frame_size);
        session.register(registry)?;
        self.sessions.insert(id, session);
        Ok(id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Removes a session outright. Used once a stream has disconnected and
    /// all its frames have been drained; the registry never holds a
    /// `stopped` session beyond the poll tick that discovered it.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionId, &Session)> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ConnectionId, &mut Session)> {
        self.sessions.iter_mut()
    }

    /// Ids in ascending (stable) order, used by the datagram scheduler to
    /// build its rotation (§4.4).
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.sessions.keys().copied().collect()
    }

    /// §4.5 shutdown: stops every live session (deregistering its socket
    /// and shutting the stream down both ways) and empties the registry.
    pub fn close_all(&mut self, registry: &Registry) {
        for session in self.sessions.values_mut() {
            session.stop(registry);
        }
        self.sessions.clear();
    }
}

impl Default for ConnRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_pair() -> (TcpStream, std::net::SocketAddr) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        drop(client);
        (TcpStream::from_std(server), peer)
    }

    #[test]
    fn ids_are_assigned_in_ascending_order_and_never_reused() {
        let poll = mio::Poll::new().unwrap();
        let mut registry = ConnRegistry::new();

        let (s1, a1) = connected_pair();
        let (s2, a2) = connected_pair();
        let id1 = registry.insert(poll.registry(), s1, a1, 4096, 1400).unwrap();
        let id2 = registry.insert(poll.registry(), s2, a2, 4096, 1400).unwrap();
        assert!(id1 < id2);
        assert_eq!(registry.len(), 2);

        registry.remove(id1);
        let (s3, a3) = connected_pair();
        let id3 = registry.insert(poll.registry(), s3, a3, 4096, 1400).unwrap();
        assert!(id3 > id2, "ids must never be reused even after a remove");
    }

    #[test]
    fn ids_list_is_sorted() {
        let poll = mio::Poll::new().unwrap();
        let mut registry = ConnRegistry::new();
        for _ in 0..3 {
            let (s, a) = connected_pair();
            registry.insert(poll.registry(), s, a, 4096, 1400).unwrap();
        }
        let ids = registry.ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
