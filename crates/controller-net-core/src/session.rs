use std::{collections::VecDeque, io, net::SocketAddr};

use mio::{Interest, Registry, Token, net::TcpStream};
use tracing::{debug, warn};

use crate::{
    codec::{self, HEADER_SIZE, pack},
    connection_id::ConnectionId,
};

enum ReadOutcome {
    Frame(Vec<u8>),
    WouldBlock,
    Disconnected,
    Fatal(crate::error::CodecError),
}

#[derive(Clone, Copy)]
enum RxState {
    ReadingHeader { buf: [u8; HEADER_SIZE], have: usize },
    ReadingBody { len: usize, offset: usize },
}

/// Result of draining every frame a readable event made available.
pub struct ReadResult {
    pub frames: Vec<Vec<u8>>,
    pub disconnected: bool,
}

/// Per-client state (§3): stream socket, paired datagram endpoint, the two
/// FIFO write queues, the two in-flight flags and the terminal `stopped`
/// flag. Owned exclusively by the registry; sessions never reference each
/// other.
pub struct Session {
    pub(crate) id: ConnectionId,
    stream: TcpStream,
    peer_addr: SocketAddr,
    token: Token,

    udp_peer: Option<SocketAddr>,

    rx_state: RxState,
    rx_buf: Vec<u8>,

    response_queue: VecDeque<Vec<u8>>,
    dataframe_queue: VecDeque<Vec<u8>>,

    stream_write_inflight: bool,
    udp_write_inflight: bool,
    pending_write: Option<Vec<u8>>,
    writable_armed: bool,

    stopped: bool,

    max_message_size: u32,
    max_data_frame_size: u16,
}

impl Session {
    pub(crate) fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        max_message_size: u32,
        max_data_frame_size: u16,
    ) -> Self {
        Self {
            id,
            stream,
            peer_addr,
            token: Token(id.as_u32() as usize),
            udp_peer: None,
            rx_state: RxState::ReadingHeader { buf: [0; HEADER_SIZE], have: 0 },
            rx_buf: Vec::new(),
            response_queue: VecDeque::new(),
            dataframe_queue: VecDeque::new(),
            stream_write_inflight: false,
            udp_write_inflight: false,
            pending_write: None,
            writable_armed: false,
            stopped: false,
            max_message_size,
            max_data_frame_size,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn udp_peer(&self) -> Option<SocketAddr> {
        self.udp_peer
    }

    pub fn stream_write_inflight(&self) -> bool {
        self.stream_write_inflight
    }

    pub fn udp_write_inflight(&self) -> bool {
        self.udp_write_inflight
    }

    pub fn dataframe_queue_is_empty(&self) -> bool {
        self.dataframe_queue.is_empty()
    }

    /// Sum of both write queues, for shutdown's discarded-work log line.
    pub fn queued_message_count(&self) -> usize {
        self.response_queue.len() + self.dataframe_queue.len()
    }

    pub fn max_data_frame_size(&self) -> u16 {
        self.max_data_frame_size
    }

    pub(crate) fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, Interest::READABLE)
    }

    /// Associates a datagram peer with this session (§4.4 `LOOKUP`). Called
    /// once the pairing service matches an inbound `int32` id to this
    /// session. Re-pairing (e.g. a NAT rebind resending the same id) simply
    /// updates the address; queued dataframes are retained (§13 open
    /// question decision).
    pub fn bind_udp_peer(&mut self, endpoint: SocketAddr) {
        self.udp_peer = Some(endpoint);
    }

    /// Appended to `response_queue`; no I/O started (§4.2). No-op once
    /// `stopped`.
    pub fn enqueue_response(&mut self, body: Vec<u8>) {
        if self.stopped {
            return;
        }
        self.response_queue.push_back(body);
    }

    /// Appended to `dataframe_queue`; no-op once `stopped`.
    pub fn enqueue_dataframe(&mut self, body: Vec<u8>) {
        if self.stopped {
            return;
        }
        self.dataframe_queue.push_back(body);
    }

    /// Idempotent terminal shutdown (§3, §4.2). Shuts the stream down both
    /// ways, clears in-flight flags and marks the session terminal so every
    /// subsequent enqueue/start/completion call is a no-op.
    pub fn stop(&mut self, registry: &Registry) {
        if self.stopped {
            return;
        }
        debug!(id = %self.id, "stopping session");
        let _ = registry.deregister(&mut self.stream);
        if let Err(err) = self.stream.shutdown(std::net::Shutdown::Both) {
            debug!(id = %self.id, %err, "error shutting down stream");
        }
        self.stream_write_inflight = false;
        self.udp_write_inflight = false;
        self.pending_write = None;
        self.stopped = true;
    }

    /// Drains every complete frame currently available on the stream,
    /// running the `READ_HEADER`/`READ_BODY` state machine (§4.2) until a
    /// read would block, the peer disconnects, or a framing error occurs
    /// (both terminal per §7).
    pub(crate) fn drain_ready_frames(&mut self, registry: &Registry) -> ReadResult {
        let mut frames = Vec::new();
        loop {
            match self.read_one_frame() {
                ReadOutcome::Frame(body) => frames.push(body),
                ReadOutcome::WouldBlock => return ReadResult { frames, disconnected: false },
                ReadOutcome::Disconnected => {
                    self.stop(registry);
                    return ReadResult { frames, disconnected: true };
                }
                ReadOutcome::Fatal(err) => {
                    warn!(id = %self.id, %err, "framing error, stopping session");
                    self.stop(registry);
                    return ReadResult { frames, disconnected: true };
                }
            }
        }
    }

    fn read_one_frame(&mut self) -> ReadOutcome {
        loop {
            match self.rx_state {
                RxState::ReadingHeader { mut buf, mut have } => {
                    while have < HEADER_SIZE {
                        match io::Read::read(&mut self.stream, &mut buf[have..]) {
                            Ok(0) => return ReadOutcome::Disconnected,
                            Ok(n) => {
                                have += n;
                                if have == HEADER_SIZE {
                                    let len =
                                        match codec::decode_header(&buf, self.max_message_size) {
                                            Ok(len) => len,
                                            Err(err) => return ReadOutcome::Fatal(err),
                                        };
                                    let len = len as usize;
                                    if self.rx_buf.len() < len {
                                        self.rx_buf.resize(len, 0);
                                    }
                                    self.rx_state = RxState::ReadingBody { len, offset: 0 };
                                }
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                self.rx_state = RxState::ReadingHeader { buf, have };
                                return ReadOutcome::WouldBlock;
                            }
                            Err(_err) => return ReadOutcome::Disconnected,
                        }
                    }
                }

                RxState::ReadingBody { len, mut offset } => {
                    // Header declaring body length 0: the loop condition is
                    // already false, so we fall straight through to the
                    // completed-frame branch below with an empty body.
                    while offset < len {
                        match io::Read::read(&mut self.stream, &mut self.rx_buf[offset..len]) {
                            Ok(0) => return ReadOutcome::Disconnected,
                            Ok(n) => {
                                offset += n;
                                if offset < len {
                                    self.rx_state = RxState::ReadingBody { len, offset };
                                }
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                self.rx_state = RxState::ReadingBody { len, offset };
                                return ReadOutcome::WouldBlock;
                            }
                            Err(_err) => return ReadOutcome::Disconnected,
                        }
                    }

                    let body = self.rx_buf[..len].to_vec();
                    self.rx_state = RxState::ReadingHeader { buf: [0; HEADER_SIZE], have: 0 };
                    return ReadOutcome::Frame(body);
                }
            }
        }
    }

    /// §4.2 `start_stream_write`: if not `stopped`, not already in-flight,
    /// and the queue is non-empty, begins writing the front. Drains as many
    /// queued responses as complete synchronously (the happy path never
    /// blocks), stopping as soon as a write would block or the queue is
    /// empty. Returns whether a write is in-flight when it returns.
    pub fn start_stream_write(&mut self, registry: &Registry) -> bool {
        if self.stopped {
            return false;
        }
        loop {
            if self.stream_write_inflight {
                return true;
            }
            let Some(front) = self.response_queue.front() else {
                self.disarm_writable(registry);
                return false;
            };
            let framed = match pack(front, self.max_message_size) {
                Ok(framed) => framed,
                Err(err) => {
                    debug!(id = %self.id, %err, "response too large to frame, dropping");
                    self.response_queue.pop_front();
                    continue;
                }
            };
            match io::Write::write(&mut self.stream, &framed) {
                Ok(n) if n == framed.len() => {
                    self.response_queue.pop_front();
                    continue;
                }
                Ok(n) => {
                    self.pending_write = Some(framed[n..].to_vec());
                    self.arm_writable(registry);
                    self.stream_write_inflight = true;
                    return true;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.pending_write = Some(framed);
                    self.arm_writable(registry);
                    self.stream_write_inflight = true;
                    return true;
                }
                Err(err) => {
                    warn!(id = %self.id, %err, "stream write failed");
                    self.stop(registry);
                    return false;
                }
            }
        }
    }

    /// Stream write completion (§4.2): flushes the in-flight write, and on
    /// success pops the front of `response_queue` and immediately tries to
    /// start the next one.
    pub(crate) fn on_stream_writable(&mut self, registry: &Registry) {
        let Some(mut pending) = self.pending_write.take() else {
            return;
        };
        loop {
            match io::Write::write(&mut self.stream, &pending) {
                Ok(0) => {
                    warn!(id = %self.id, "stream write returned 0, stopping");
                    self.stop(registry);
                    return;
                }
                Ok(n) if n == pending.len() => {
                    self.response_queue.pop_front();
                    self.stream_write_inflight = false;
                    self.start_stream_write(registry);
                    return;
                }
                Ok(n) => {
                    pending.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.pending_write = Some(pending);
                    return;
                }
                Err(err) => {
                    warn!(id = %self.id, %err, "stream write failed");
                    self.stop(registry);
                    return;
                }
            }
        }
    }

    fn arm_writable(&mut self, registry: &Registry) {
        if self.writable_armed {
            return;
        }
        if let Err(err) =
            registry.reregister(&mut self.stream, self.token, Interest::READABLE | Interest::WRITABLE)
        {
            debug!(id = %self.id, %err, "reregister for writable failed");
            return;
        }
        self.writable_armed = true;
    }

    fn disarm_writable(&mut self, registry: &Registry) {
        if !self.writable_armed {
            return;
        }
        if let Err(err) = registry.reregister(&mut self.stream, self.token, Interest::READABLE) {
            debug!(id = %self.id, %err, "reregister to drop writable failed");
            return;
        }
        self.writable_armed = false;
    }

    /// Clones the front of `dataframe_queue` without removing it. Only ever
    /// called by the datagram scheduler, which owns the serialization
    /// discipline across the whole registry (§4.4); the entry is removed by
    /// `dataframe_send_completed` once the datagram is actually away.
    pub(crate) fn peek_dataframe(&self) -> Option<Vec<u8>> {
        self.dataframe_queue.front().cloned()
    }

    pub(crate) fn dataframe_send_started(&mut self) {
        self.udp_write_inflight = true;
    }

    /// Datagram write completion (§4.2): clears the in-flight flag and pops
    /// the transmitted frame.
    pub(crate) fn dataframe_send_completed(&mut self) {
        self.udp_write_inflight = false;
        self.dataframe_queue.pop_front();
    }

    /// Oversized-dataframe drop (§7): logs and drops the front without ever
    /// marking a send in-flight.
    pub(crate) fn drop_oversized_dataframe(&mut self) {
        if let Some(dropped) = self.dataframe_queue.pop_front() {
            debug!(
                id = %self.id,
                len = dropped.len(),
                max = self.max_data_frame_size,
                "dataframe exceeds max size, dropping"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        net::{TcpListener, TcpStream as StdTcpStream},
        thread,
        time::Duration,
    };

    use super::*;
    use crate::error::CodecError;

    fn test_session(max_message_size: u32) -> (Session, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let stream = TcpStream::from_std(server);
        (Session::new(ConnectionId(0), stream, peer, max_message_size, 1400), client)
    }

    fn read_one_frame_retrying(session: &mut Session) -> ReadOutcome {
        for _ in 0..200 {
            match session.read_one_frame() {
                ReadOutcome::WouldBlock => thread::sleep(Duration::from_millis(1)),
                outcome => return outcome,
            }
        }
        panic!("timed out waiting for a frame");
    }

    #[test]
    fn zero_length_frame_produces_empty_body() {
        let (mut session, mut client) = test_session(4096);
        client.write_all(&pack(&[], 4096).unwrap()).unwrap();
        match read_one_frame_retrying(&mut session) {
            ReadOutcome::Frame(body) => assert!(body.is_empty()),
            _ => panic!("expected an empty frame"),
        }
    }

    #[test]
    fn fragmented_header_and_body_reassemble_into_one_frame() {
        let (mut session, mut client) = test_session(4096);
        let framed = pack(&[1, 2, 3, 4, 5], 4096).unwrap();
        for chunk in framed.chunks(2) {
            client.write_all(chunk).unwrap();
            client.flush().unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        match read_one_frame_retrying(&mut session) {
            ReadOutcome::Frame(body) => assert_eq!(body, vec![1, 2, 3, 4, 5]),
            _ => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn peer_disconnect_mid_header_is_reported() {
        let (mut session, mut client) = test_session(4096);
        client.write_all(&[0, 0]).unwrap();
        drop(client);
        match read_one_frame_retrying(&mut session) {
            ReadOutcome::Disconnected => {}
            _ => panic!("expected a disconnect"),
        }
    }

    #[test]
    fn header_over_max_message_size_is_fatal() {
        let (mut session, mut client) = test_session(8);
        client.write_all(&100u32.to_le_bytes()).unwrap();
        match read_one_frame_retrying(&mut session) {
            ReadOutcome::Fatal(CodecError::BodyTooLarge { len: 100, max: 8 }) => {}
            _ => panic!("expected BodyTooLarge"),
        }
    }
}
