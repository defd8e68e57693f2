//! The single-threaded poll driver (§4.5, §7).
//!
//! `EventLoop` owns every socket in the process. It is generic over the
//! request/response/telemetry wire types so the core never has to know
//! their shape (see `traits.rs`); the caller supplies a handler closure
//! that turns a decoded request into a response.

use std::{
    io,
    marker::PhantomData,
    net::SocketAddr,
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, net::TcpListener, net::UdpSocket};
use tracing::{error, info, warn};

use crate::{
    connection_id::ConnectionId,
    registry::ConnRegistry,
    scheduler::DatagramScheduler,
    sockopt::set_socket_buf_size,
    traits::{DecodeRequest, EncodeBody, Notification},
    udp_channel::UdpChannel,
};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const UDP_TOKEN: Token = Token(usize::MAX - 1);

/// Everything in §10.3's `ServerConfig` that the driver itself needs,
/// independent of how the caller sourced it (CLI flags, a TOML file, or
/// hardcoded defaults in a test).
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub tcp_bind_addr: SocketAddr,
    pub udp_bind_addr: SocketAddr,
    pub max_message_size: u32,
    pub max_data_frame_size: u16,
    pub poll_budget: usize,
    pub socket_buf_size: Option<usize>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tcp_bind_addr: "0.0.0.0:0".parse().unwrap(),
            udp_bind_addr: "0.0.0.0:0".parse().unwrap(),
            max_message_size: crate::codec::MAX_MESSAGE_SIZE,
            max_data_frame_size: crate::codec::MAX_DATA_FRAME_MESSAGE_SIZE,
            poll_budget: 32,
            socket_buf_size: None,
        }
    }
}

pub struct EventLoop<Req, Resp, Frame, H>
where
    Req: DecodeRequest,
    Resp: Notification,
    Frame: EncodeBody,
    H: FnMut(ConnectionId, Req) -> Resp,
{
    poll: Poll,
    events: Events,
    listener: TcpListener,
    udp: UdpChannel,
    conns: ConnRegistry,
    scheduler: DatagramScheduler,
    handler: H,
    config: DriverConfig,
    _req: PhantomData<Req>,
    _resp: PhantomData<Resp>,
    _frame: PhantomData<Frame>,
}

impl<Req, Resp, Frame, H> EventLoop<Req, Resp, Frame, H>
where
    Req: DecodeRequest,
    Resp: Notification,
    Frame: EncodeBody,
    H: FnMut(ConnectionId, Req) -> Resp,
{
    /// Binds the TCP listener and UDP socket and registers both with a
    /// fresh `Poll`. No client I/O happens until `run_once` is called.
    pub fn startup(config: DriverConfig, handler: H) -> io::Result<Self> {
        let poll = Poll::new()?;

        let mut listener = TcpListener::bind(config.tcp_bind_addr)?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let socket = UdpSocket::bind(config.udp_bind_addr)?;
        if let Some(size) = config.socket_buf_size {
            if let Err(err) = set_socket_buf_size(&socket, size) {
                warn!(%err, "failed to tune UDP socket buffer size");
            }
        }
        let mut udp = UdpChannel::new(socket, UDP_TOKEN);
        udp.register(poll.registry())?;

        info!(
            tcp_addr = %config.tcp_bind_addr,
            udp_addr = %config.udp_bind_addr,
            "event loop started"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            udp,
            conns: ConnRegistry::new(),
            scheduler: DatagramScheduler::new(),
            handler,
            config,
            _req: PhantomData,
            _resp: PhantomData,
            _frame: PhantomData,
        })
    }

    /// Local address the TCP listener actually bound to (useful when the
    /// caller requested an ephemeral port).
    pub fn tcp_local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn udp_local_addr(&self) -> io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// One driver tick (§4.5): up to `poll_budget` passes of
    /// schedule-one-datagram-write, then a nonblocking mio poll. The bound
    /// exists because a datagram write can complete synchronously within
    /// the same tick, clearing `udp_write_inflight` and leaving more of the
    /// queue immediately sendable — a single pass would leave it idle
    /// until the next external wakeup.
    pub fn run_once(&mut self) -> io::Result<()> {
        for _ in 0..self.config.poll_budget {
            self.scheduler.run_one_tick(self.poll.registry(), &mut self.conns, &mut self.udp);

            self.poll.poll(&mut self.events, Some(Duration::ZERO))?;
            if !self.events.is_empty() {
                self.process_events();
            }

            let backlog_without_inflight =
                !self.udp.is_write_inflight() && self.any_session_has_dataframe_backlog();
            if !backlog_without_inflight {
                break;
            }
        }
        Ok(())
    }

    fn any_session_has_dataframe_backlog(&self) -> bool {
        self.conns.iter().any(|(_, session)| !session.dataframe_queue_is_empty())
    }

    fn process_events(&mut self) {
        let batch: Vec<(Token, bool, bool)> =
            self.events.iter().map(|e| (e.token(), e.is_readable(), e.is_writable())).collect();
        for (token, readable, writable) in batch {
            self.handle_event(token, readable, writable);
        }
    }

    fn handle_event(&mut self, token: Token, readable: bool, writable: bool) {
        if token == LISTENER_TOKEN {
            if readable {
                self.accept_loop();
            }
            return;
        }
        if token == UDP_TOKEN {
            if readable {
                self.handle_udp_readable();
            }
            if writable {
                let registry = self.poll.registry();
                let conns = &mut self.conns;
                self.udp.on_writable(registry, |id, sent| {
                    if let Some(session) = conns.get_mut(id) {
                        if sent {
                            session.dataframe_send_completed();
                        } else {
                            session.stop(registry);
                        }
                    }
                });
            }
            return;
        }

        let id = ConnectionId(token.0 as u32);
        if readable {
            self.handle_stream_readable(id);
        }
        if writable {
            let registry = self.poll.registry();
            if let Some(session) = self.conns.get_mut(id) {
                session.on_stream_writable(registry);
            }
        }
    }

    fn accept_loop(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!(%peer_addr, %err, "failed to set TCP_NODELAY");
                    }
                    if let Some(size) = self.config.socket_buf_size {
                        if let Err(err) = set_socket_buf_size(&stream, size) {
                            warn!(%peer_addr, %err, "failed to tune socket buffer size");
                        }
                    }
                    match self.conns.insert(
                        self.poll.registry(),
                        stream,
                        peer_addr,
                        self.config.max_message_size,
                        self.config.max_data_frame_size,
                    ) {
                        Ok(id) => {
                            info!(%id, %peer_addr, "accepted connection");
                            if let Some(session) = self.conns.get_mut(id) {
                                let greeting = Resp::connection_info(id);
                                session.enqueue_response(greeting.encode());
                                session.start_stream_write(self.poll.registry());
                            }
                        }
                        Err(err) => warn!(%peer_addr, %err, "failed to register accepted stream"),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    error!(%err, "accept failed");
                    return;
                }
            }
        }
    }

    fn handle_udp_readable(&mut self) {
        let requests = self.udp.drain_pairing_requests();
        for req in requests {
            let accepted = match ConnectionId::from_wire(req.wire_id) {
                Some(id) => {
                    if let Some(session) = self.conns.get_mut(id) {
                        session.bind_udp_peer(req.from);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };
            self.udp.send_pairing_ack(req.from, accepted, self.poll.registry());
        }
    }

    fn handle_stream_readable(&mut self, id: ConnectionId) {
        let (frames, disconnected) = {
            let registry = self.poll.registry();
            let Some(session) = self.conns.get_mut(id) else { return };
            let result = session.drain_ready_frames(registry);
            (result.frames, result.disconnected)
        };

        for body in frames {
            match Req::decode(&body) {
                Ok(req) => {
                    let resp = (self.handler)(id, req);
                    if let Some(session) = self.conns.get_mut(id) {
                        session.enqueue_response(resp.encode());
                    }
                }
                Err(err) => {
                    warn!(%id, %err, "malformed request, stopping session");
                    if let Some(session) = self.conns.get_mut(id) {
                        session.stop(self.poll.registry());
                    }
                    break;
                }
            }
        }

        if disconnected {
            self.conns.remove(id);
        } else if let Some(session) = self.conns.get_mut(id) {
            if session.is_stopped() {
                self.conns.remove(id);
            } else {
                session.start_stream_write(self.poll.registry());
            }
        }
    }

    /// §4.5 `send_notification`: enqueues a `request_id = -1` message onto
    /// one session's `response_queue` and starts the write.
    pub fn send_notification(&mut self, id: ConnectionId, notification: Resp) {
        let registry = self.poll.registry();
        if let Some(session) = self.conns.get_mut(id) {
            session.enqueue_response(notification.into_notification().encode());
            session.start_stream_write(registry);
        }
    }

    /// §4.5 `broadcast_notification`: the same message enqueued onto every
    /// live session, in registry order.
    pub fn broadcast_notification(&mut self, notification: Resp)
    where
        Resp: Clone,
    {
        let ids = self.conns.ids();
        let notification = notification.into_notification();
        for id in ids {
            let registry = self.poll.registry();
            if let Some(session) = self.conns.get_mut(id) {
                session.enqueue_response(notification.clone().encode());
                session.start_stream_write(registry);
            }
        }
    }

    /// §4.4/§4.5: appends a telemetry frame to one session's
    /// `dataframe_queue` and invokes the datagram scheduler once, so a
    /// call made between ticks doesn't wait a full tick to start moving.
    pub fn send_controller_data_frame(&mut self, id: ConnectionId, frame: Frame) {
        if let Some(session) = self.conns.get_mut(id) {
            session.enqueue_dataframe(frame.encode());
        }
        self.scheduler.run_one_tick(self.poll.registry(), &mut self.conns, &mut self.udp);
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.conns.get(id).is_some_and(|s| !s.is_stopped())
    }

    /// §4.5 shutdown: stops every session and logs how much was in flight,
    /// for operators watching the log at shutdown time.
    pub fn shutdown(&mut self) {
        let sessions = self.conns.len();
        let discarded: usize = self.conns.iter().map(|(_, session)| session.queued_message_count()).sum();
        info!(sessions, discarded, "event loop shutting down");
        self.conns.close_all(self.poll.registry());
    }
}
