//! Connection state and the send/receive paths.
//!
//! A connection joins exactly two endpoints, client and server, over an
//! unreliable and possibly address-changing path. It is caller-driven and
//! synchronous: no internal threads, no event loop. The caller polls
//! readability on the socket, calls [`Connection::recv`], and calls
//! [`Connection::send`] at its own cadence, consulting
//! [`Connection::timeout`] as a pacing hint.
//!
//! The sequence gate in the receive path is security-sensitive: a packet is
//! allowed to update state only if its sequence is at least the next
//! expected one, so a replayed or reordered datagram can neither corrupt
//! the RTT estimate, overwrite a newer timestamp, nor hijack the server's
//! remote-address latch. Its payload is still delivered; the layer above
//! is idempotent with respect to duplicates.

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::constants::{
    CONGESTION_TIMESTAMP_PENALTY, MAX_RTT_SAMPLE_MS, PORT_HOP_INTERVAL,
    SAVED_TIMESTAMP_MAX_HOLD_MS, SEND_MTU, SERVER_ASSOCIATION_TIMEOUT,
};
use crate::core::error::NetError;
use crate::crypto::Direction;
use crate::crypto::{Session, SessionKey};
use crate::transport::packet::{Packet, TIMESTAMP_NONE};
use crate::transport::socket::{DatagramSocket, RecvMeta, resolve_first};
use crate::transport::timing::{Clock, MonotonicClock, RttEstimator, timestamp_diff, timestamp16};

/// Endpoint role, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listens first; latches whichever client speaks to it.
    Server,
    /// Knows its peer from the start; may hop local ports.
    Client,
}

impl Role {
    /// Direction of the datagrams this endpoint emits.
    pub fn outgoing_direction(self) -> Direction {
        match self {
            Role::Server => Direction::ToClient,
            Role::Client => Direction::ToServer,
        }
    }
}

/// One end of an authenticated datagram transport.
pub struct Connection {
    socket: DatagramSocket,
    session: Session,
    role: Role,
    remote_addr: Option<SocketAddr>,

    next_seq: u64,
    expected_receiver_seq: u64,

    /// Peer timestamp waiting to be reflected. Signed: the congestion
    /// penalty may drive it below zero; reflection reduces mod 2^16.
    saved_timestamp: Option<i64>,
    saved_timestamp_received_at: u64,

    last_heard: u64,
    last_port_choice: u64,
    last_roundtrip_success: u64,

    rtt: RttEstimator,
    clock: Arc<dyn Clock>,

    /// Deferred outcome of the most recent failed send.
    send_error: Option<NetError>,
}

impl Connection {
    /// Bind a server endpoint. It starts unattached and latches the first
    /// client whose datagram authenticates.
    pub fn server(
        desired_addr: Option<&str>,
        desired_port: Option<u16>,
        key: &SessionKey,
    ) -> Result<Self, NetError> {
        Self::server_with_clock(desired_addr, desired_port, key, Arc::new(MonotonicClock::new()))
    }

    /// Server endpoint with an injected clock (deterministic tests).
    pub fn server_with_clock(
        desired_addr: Option<&str>,
        desired_port: Option<u16>,
        key: &SessionKey,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NetError> {
        let socket = DatagramSocket::bind_server(desired_addr, desired_port)?;
        let now = clock.now_ms();
        Ok(Self::assemble(socket, key, Role::Server, None, now, clock))
    }

    /// Create a client endpoint aimed at `host:port`.
    ///
    /// The socket stays unconnected; every send names its destination so
    /// roaming and port hopping keep working.
    pub fn client(host: &str, port: u16, key: &SessionKey) -> Result<Self, NetError> {
        Self::client_with_clock(host, port, key, Arc::new(MonotonicClock::new()))
    }

    /// Client endpoint with an injected clock (deterministic tests).
    pub fn client_with_clock(
        host: &str,
        port: u16,
        key: &SessionKey,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NetError> {
        let remote = resolve_first(host, port)?;
        let socket = DatagramSocket::for_remote(&remote)?;
        let now = clock.now_ms();
        Ok(Self::assemble(socket, key, Role::Client, Some(remote), now, clock))
    }

    fn assemble(
        socket: DatagramSocket,
        key: &SessionKey,
        role: Role,
        remote_addr: Option<SocketAddr>,
        now: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            socket,
            session: Session::new(key),
            role,
            remote_addr,
            next_seq: 0,
            expected_receiver_seq: 0,
            saved_timestamp: None,
            saved_timestamp_received_at: 0,
            last_heard: 0,
            last_port_choice: now,
            last_roundtrip_success: 0,
            rtt: RttEstimator::new(),
            clock,
            send_error: None,
        }
    }

    /// Send one payload as one datagram, best-effort.
    ///
    /// Returns silently when no remote is latched (a server awaiting first
    /// contact). A kernel-side failure is indistinguishable from a datagram
    /// lost in flight, so it does not alter control flow: it is recorded
    /// for [`Connection::last_send_error`] and the call returns normally.
    pub fn send(&mut self, payload: &[u8]) {
        let Some(remote) = self.remote_addr else {
            return;
        };

        let now = self.clock.now_ms();
        let packet = self.new_packet(now, payload);

        match packet.encode(&self.session) {
            Ok(datagram) => match self.socket.send_to(&datagram, remote) {
                Ok(sent) if sent == datagram.len() => {
                    self.send_error = None;
                }
                Ok(sent) => {
                    self.send_error = Some(NetError::ShortSend {
                        sent,
                        len: datagram.len(),
                    });
                }
                Err(err) => {
                    self.send_error = Some(NetError::Socket(err));
                }
            },
            Err(err) => {
                self.send_error = Some(NetError::Crypto(err));
            }
        }

        match self.role {
            Role::Server => {
                if now.saturating_sub(self.last_heard) > SERVER_ASSOCIATION_TIMEOUT {
                    self.remote_addr = None;
                    info!("server detached from client");
                }
            }
            Role::Client => {
                if now.saturating_sub(self.last_port_choice) > PORT_HOP_INTERVAL
                    && now.saturating_sub(self.last_roundtrip_success) > PORT_HOP_INTERVAL
                {
                    self.hop_port(now);
                }
            }
        }
    }

    /// Stamp the next outbound packet.
    fn new_packet(&mut self, now: u64, payload: &[u8]) -> Packet {
        let mut outgoing_timestamp_reply = TIMESTAMP_NONE;

        if let Some(saved) = self.saved_timestamp {
            let held = now.saturating_sub(self.saved_timestamp_received_at);
            if held < SAVED_TIMESTAMP_MAX_HOLD_MS {
                // Reflect the saved timestamp advanced by how long we held it.
                outgoing_timestamp_reply = (saved + held as i64).rem_euclid(65536) as u16;
                self.saved_timestamp = None;
                self.saved_timestamp_received_at = 0;
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        Packet {
            direction: self.role.outgoing_direction(),
            seq,
            timestamp: timestamp16(now),
            timestamp_reply: outgoing_timestamp_reply,
            payload: payload.to_vec(),
        }
    }

    /// Rebind the client to a new local port, keeping the remote address.
    ///
    /// The replacement socket is fully constructed before the old one is
    /// given up; a failed hop keeps the current socket. Either way the
    /// choice time is refreshed so a dead range is not re-searched on
    /// every send.
    fn hop_port(&mut self, now: u64) {
        debug_assert_eq!(self.role, Role::Client);
        self.last_port_choice = now;

        let Some(remote) = self.remote_addr else {
            return;
        };
        match DatagramSocket::rebind_in_range(&remote) {
            Ok(socket) => {
                self.socket = socket;
                let port = self.socket.local_addr().map(|a| a.port()).unwrap_or(0);
                debug!(port, "hopped to a new local port");
            }
            Err(err) => {
                warn!(%err, "port hop failed, keeping current socket");
            }
        }
    }

    /// Receive one datagram.
    ///
    /// - `Err` for the fatal cases: the receive syscall failed or the
    ///   datagram was truncated. The connection stays usable.
    /// - `Ok(None)` for silent drops: decryption failure, malformed
    ///   plaintext, or a direction mismatch. No state is advanced; this is
    ///   the replay/attack path and stays quiet.
    /// - `Ok(Some(payload))` otherwise. Out-of-order and duplicate payloads
    ///   are delivered too; only state updates are gated on the sequence.
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        let meta = self.socket.recv_meta()?;
        let now = self.clock.now_ms();

        let packet = match Packet::decode(self.socket.datagram(meta.len), &self.session) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(%err, from = %meta.from, "dropping undecodable datagram");
                return Ok(None);
            }
        };

        // A peer's own datagrams played back at it must never count.
        if packet.direction != self.role.outgoing_direction().opposite() {
            debug!(from = %meta.from, "dropping datagram with reflected direction");
            return Ok(None);
        }

        if packet.seq >= self.expected_receiver_seq {
            self.accept(&packet, &meta, now);
        }

        Ok(Some(packet.payload))
    }

    /// Apply the state updates of an accepted (in-order) packet.
    fn accept(&mut self, packet: &Packet, meta: &RecvMeta, now: u64) {
        self.expected_receiver_seq = packet.seq + 1;

        if packet.timestamp != TIMESTAMP_NONE {
            let mut saved = i64::from(packet.timestamp);
            if meta.congestion_experienced {
                // Reflect an inflated holding time; the peer reads a larger
                // RTT and backs off toward its minimum frame rate.
                saved -= CONGESTION_TIMESTAMP_PENALTY;
                if self.role == Role::Server {
                    info!("received explicit congestion notification");
                }
            }
            self.saved_timestamp = Some(saved);
            self.saved_timestamp_received_at = now;
        }

        if packet.timestamp_reply != TIMESTAMP_NONE {
            let sample = u64::from(timestamp_diff(timestamp16(now), packet.timestamp_reply));
            // Very large values mean the peer was suspended, not slow.
            if sample < MAX_RTT_SAMPLE_MS {
                self.rtt.observe(sample as f64);
                self.last_roundtrip_success = now;
            }
        }

        self.last_heard = now;

        if self.role == Role::Server && self.remote_addr != Some(meta.from) {
            // Only the client roams; the server follows it.
            self.remote_addr = Some(meta.from);
            debug!(peer = %meta.from, "attached to client");
        }
    }

    /// Retransmission-timeout hint for the caller's pacing, in milliseconds.
    pub fn timeout(&self) -> u64 {
        self.rtt.timeout_ms()
    }

    /// Current smoothed RTT estimate in milliseconds.
    pub fn srtt(&self) -> f64 {
        self.rtt.srtt_ms()
    }

    /// Whether at least one RTT sample has been accepted.
    pub fn rtt_hit(&self) -> bool {
        self.rtt.has_sample()
    }

    /// Take the deferred error of the most recent failed send, if any.
    pub fn last_send_error(&mut self) -> Option<NetError> {
        self.send_error.take()
    }

    /// Whether a send failure is waiting to be taken.
    pub fn has_send_error(&self) -> bool {
        self.send_error.is_some()
    }

    /// Whether a remote address is currently latched.
    pub fn is_attached(&self) -> bool {
        self.remote_addr.is_some()
    }

    /// The latched remote address, if any.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// This endpoint's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Local UDP port currently bound.
    pub fn local_port(&self) -> Result<u16, NetError> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Datagram size ceiling for the layer above.
    pub fn mtu(&self) -> usize {
        SEND_MTU
    }

    /// Clock reading at the last accepted inbound datagram (0 = never).
    pub fn last_heard_ms(&self) -> u64 {
        self.last_heard
    }

    /// One beyond the highest inbound sequence accepted for state updates.
    pub fn expected_receiver_seq(&self) -> u64 {
        self.expected_receiver_seq
    }

    /// Bound the blocking receive. `None` blocks forever.
    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> Result<(), NetError> {
        Ok(self.socket.set_recv_timeout(timeout)?)
    }
}

/// The underlying datagram descriptor, for the caller's readiness polling.
///
/// A port hop replaces the socket, so the descriptor must be re-fetched
/// after every send.
impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{MAX_RTO, MIN_RTO, PORT_RANGE_HIGH, PORT_RANGE_LOW};
    use crate::crypto::construct_nonce;
    use crate::transport::timing::ManualClock;
    use std::collections::HashSet;

    fn manual(start_ms: u64) -> Arc<ManualClock> {
        Arc::new(ManualClock::new(start_ms))
    }

    fn server(clock: Arc<ManualClock>) -> (Connection, SessionKey) {
        let key = SessionKey::generate();
        let conn = Connection::server_with_clock(Some("127.0.0.1"), None, &key, clock).unwrap();
        (conn, key)
    }

    fn meta(from: SocketAddr, congestion: bool) -> RecvMeta {
        RecvMeta {
            len: 0,
            from,
            congestion_experienced: congestion,
        }
    }

    fn inbound(seq: u64, timestamp: u16, timestamp_reply: u16) -> Packet {
        Packet {
            direction: Direction::ToServer,
            seq,
            timestamp,
            timestamp_reply,
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_new_packet_sequences_and_nonces_are_unique() {
        let clock = manual(50_000);
        let (mut conn, _key) = server(clock);

        let mut nonces = HashSet::new();
        for expected_seq in 0..1000 {
            let packet = conn.new_packet(50_000, b"");
            assert_eq!(packet.seq, expected_seq);
            assert!(nonces.insert(construct_nonce(packet.direction, packet.seq)));
        }
    }

    #[test]
    fn test_new_packet_reply_absent_without_saved_timestamp() {
        let clock = manual(50_000);
        let (mut conn, _key) = server(clock);
        let packet = conn.new_packet(50_000, b"");
        assert_eq!(packet.timestamp_reply, TIMESTAMP_NONE);
    }

    #[test]
    fn test_new_packet_reflects_and_clears_saved_timestamp() {
        let clock = manual(50_000);
        let (mut conn, _key) = server(clock);
        conn.saved_timestamp = Some(120);
        conn.saved_timestamp_received_at = 50_000;

        let packet = conn.new_packet(50_007, b"");
        assert_eq!(packet.timestamp_reply, 127); // advanced by the 7 ms hold
        assert!(conn.saved_timestamp.is_none());

        let next = conn.new_packet(50_008, b"");
        assert_eq!(next.timestamp_reply, TIMESTAMP_NONE);
    }

    #[test]
    fn test_new_packet_stale_saved_timestamp_not_reflected() {
        let clock = manual(50_000);
        let (mut conn, _key) = server(clock);
        conn.saved_timestamp = Some(120);
        conn.saved_timestamp_received_at = 50_000;

        let packet = conn.new_packet(50_000 + SAVED_TIMESTAMP_MAX_HOLD_MS, b"");
        assert_eq!(packet.timestamp_reply, TIMESTAMP_NONE);
    }

    #[test]
    fn test_accept_is_monotone() {
        let clock = manual(60_000);
        let (mut conn, _key) = server(clock);
        let from = "127.0.0.1:50505".parse().unwrap();

        conn.accept(&inbound(0, 1, TIMESTAMP_NONE), &meta(from, false), 60_000);
        assert_eq!(conn.expected_receiver_seq(), 1);

        conn.accept(&inbound(9, 2, TIMESTAMP_NONE), &meta(from, false), 60_001);
        assert_eq!(conn.expected_receiver_seq(), 10);
    }

    #[test]
    fn test_accept_latches_timestamp_and_peer() {
        let clock = manual(60_000);
        let (mut conn, _key) = server(clock);
        let from = "127.0.0.1:50505".parse().unwrap();

        assert!(!conn.is_attached());
        conn.accept(&inbound(0, 321, TIMESTAMP_NONE), &meta(from, false), 60_000);

        assert_eq!(conn.saved_timestamp, Some(321));
        assert_eq!(conn.saved_timestamp_received_at, 60_000);
        assert_eq!(conn.remote_addr(), Some(from));
        assert_eq!(conn.last_heard_ms(), 60_000);
    }

    #[test]
    fn test_accept_sentinel_timestamp_changes_nothing() {
        let clock = manual(60_000);
        let (mut conn, _key) = server(clock);
        let from = "127.0.0.1:50505".parse().unwrap();

        conn.accept(
            &inbound(0, TIMESTAMP_NONE, TIMESTAMP_NONE),
            &meta(from, false),
            60_000,
        );
        assert!(conn.saved_timestamp.is_none());
        assert!(!conn.rtt_hit());
    }

    #[test]
    fn test_accept_congestion_penalty() {
        let clock = manual(60_000);
        let (mut conn, _key) = server(clock);
        let from = "127.0.0.1:50505".parse().unwrap();

        conn.accept(&inbound(0, 100, TIMESTAMP_NONE), &meta(from, true), 60_000);
        assert_eq!(conn.saved_timestamp, Some(100 - CONGESTION_TIMESTAMP_PENALTY));

        // The reflected value wraps mod 2^16 rather than underflowing.
        let packet = conn.new_packet(60_000, b"");
        assert_eq!(
            packet.timestamp_reply,
            (i64::from(100u16) - CONGESTION_TIMESTAMP_PENALTY).rem_euclid(65536) as u16
        );
    }

    #[test]
    fn test_accept_rtt_sample() {
        let clock = manual(60_000);
        let (mut conn, _key) = server(clock);
        let from = "127.0.0.1:50505".parse().unwrap();

        // now16 = 60_000; a reply of 59_960 is a 40 ms round trip.
        conn.accept(&inbound(0, TIMESTAMP_NONE, 59_960), &meta(from, false), 60_000);
        assert!(conn.rtt_hit());
        assert!((conn.srtt() - 40.0).abs() < f64::EPSILON);
        assert_eq!(conn.last_roundtrip_success, 60_000);
    }

    #[test]
    fn test_accept_discards_spurious_rtt_sample() {
        let clock = manual(60_000);
        let (mut conn, _key) = server(clock);
        let from = "127.0.0.1:50505".parse().unwrap();

        // A peer resumed from suspension reflects something ancient.
        conn.accept(
            &inbound(0, TIMESTAMP_NONE, timestamp16(60_000 - 5_000)),
            &meta(from, false),
            60_000,
        );
        assert!(!conn.rtt_hit());
        assert_eq!(conn.last_roundtrip_success, 0);
    }

    #[test]
    fn test_timeout_stays_clamped() {
        let clock = manual(60_000);
        let (mut conn, _key) = server(clock);
        assert!((MIN_RTO..=MAX_RTO).contains(&conn.timeout()));
        conn.rtt.observe(1.0);
        assert_eq!(conn.timeout(), MIN_RTO);
        conn.rtt.observe(4_999.0);
        assert!((MIN_RTO..=MAX_RTO).contains(&conn.timeout()));
    }

    #[test]
    fn test_server_detaches_after_silence() {
        let clock = manual(100_000);
        let (mut conn, _key) = server(clock.clone());
        let from = "127.0.0.1:50505".parse().unwrap();

        conn.accept(&inbound(0, 1, TIMESTAMP_NONE), &meta(from, false), 100_000);
        assert!(conn.is_attached());

        clock.advance(SERVER_ASSOCIATION_TIMEOUT);
        conn.send(b"still here");
        assert!(conn.is_attached());

        clock.advance(1);
        conn.send(b"gone");
        assert!(!conn.is_attached());

        // Suppressed until a fresh client packet re-attaches.
        let seq_before = conn.next_seq;
        conn.send(b"suppressed");
        assert_eq!(conn.next_seq, seq_before);
    }

    #[test]
    fn test_client_hops_only_when_both_gates_open() {
        let clock = manual(100_000);
        let key = SessionKey::generate();
        let mut conn =
            Connection::client_with_clock("127.0.0.1", 60000, &key, clock.clone()).unwrap();
        let original_port = conn.local_port().unwrap();

        // Fresh port choice: no hop.
        conn.send(b"a");
        assert_eq!(conn.local_port().unwrap(), original_port);

        // Port choice stale but a round trip succeeded recently: no hop.
        clock.advance(PORT_HOP_INTERVAL + 1);
        conn.last_roundtrip_success = clock.now_ms() - 1;
        conn.send(b"b");
        assert_eq!(conn.local_port().unwrap(), original_port);

        // Both stale: hop into the search range.
        clock.advance(PORT_HOP_INTERVAL + 1);
        conn.send(b"c");
        let hopped = conn.local_port().unwrap();
        assert_ne!(hopped, original_port);
        assert!((PORT_RANGE_LOW..=PORT_RANGE_HIGH).contains(&hopped));
        assert_eq!(conn.last_port_choice, clock.now_ms());
    }

    #[test]
    fn test_send_failure_is_deferred_and_consumed() {
        let clock = manual(100_000);
        let key = SessionKey::generate();
        let mut conn =
            Connection::client_with_clock("127.0.0.1", 60000, &key, clock.clone()).unwrap();

        // An oversized datagram makes sendto fail without touching the peer.
        conn.send(&vec![0u8; 70_000]);
        assert!(conn.has_send_error());
        assert!(conn.last_send_error().is_some());
        assert!(conn.last_send_error().is_none());

        // A successful send clears any stale record.
        conn.send(b"ok");
        assert!(!conn.has_send_error());
    }
}
