//! Protocol tunables.
//!
//! These defaults match the deployed transport; they are compile-time
//! constants because the layer above supervises endpoint lifetime and has
//! no per-connection configuration surface.

// =============================================================================
// DATAGRAM SIZES
// =============================================================================

/// Ceiling for one outbound datagram. The layer above fragments to this.
pub const SEND_MTU: usize = 1300;

/// Receive buffer size. A datagram larger than this is truncated by the
/// kernel and treated as a fatal receive error.
pub const RECEIVE_MTU: usize = 2048;

// =============================================================================
// ASSOCIATION AND PORT HOPPING
// =============================================================================

/// The server drops its remote-address latch after this many milliseconds
/// without an accepted inbound datagram.
pub const SERVER_ASSOCIATION_TIMEOUT: u64 = 40_000;

/// Minimum milliseconds between client port hops, and since the last
/// successful round trip. Both gates must be open before the client rebinds.
pub const PORT_HOP_INTERVAL: u64 = 10_000;

/// Inclusive low end of the port range searched by the server bind (when no
/// port is requested) and by the client port hop.
pub const PORT_RANGE_LOW: u16 = 60001;

/// Inclusive high end of the port search range.
pub const PORT_RANGE_HIGH: u16 = 60999;

// =============================================================================
// TIMING AND CONGESTION
// =============================================================================

/// Milliseconds subtracted from the reflected timestamp when a datagram
/// arrives with Congestion Experienced set. The peer observes an inflated
/// round trip and slows its send cadence.
pub const CONGESTION_TIMESTAMP_PENALTY: i64 = 500;

/// Lower clamp on the retransmission-timeout hint, in milliseconds.
pub const MIN_RTO: u64 = 50;

/// Upper clamp on the retransmission-timeout hint, in milliseconds.
pub const MAX_RTO: u64 = 1000;

/// Smoothing gain for SRTT (1/8, per the classic Jacobson estimator).
pub const RTT_ALPHA: f64 = 0.125;

/// Smoothing gain for RTTVAR (1/4).
pub const RTT_BETA: f64 = 0.25;

/// Reflected samples at least this large are spurious (the peer was
/// suspended, not slow) and are discarded.
pub const MAX_RTT_SAMPLE_MS: u64 = 5_000;

/// A saved inbound timestamp older than this is no longer reflected.
pub const SAVED_TIMESTAMP_MAX_HOLD_MS: u64 = 1_000;
