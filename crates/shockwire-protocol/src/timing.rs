//! Channel timing -- the parameter set both the client and the node assume.
//!
//! Hardcoded as DEFAULT_TIMING. Individual values can be overridden from the
//! client config; the defaults mirror what deployed nodes expect (a liveness
//! ping well inside the watchdog interval).

/// Timing and size parameters for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTiming {
    // -- Liveness --
    /// Watchdog check interval in seconds. Also the silence threshold.
    pub watchdog_interval_secs: u64,

    // -- Connect --
    /// Connect calls closer together than this collapse into the trailing one.
    pub connect_debounce_ms: u64,
    /// Seconds to wait for the node's connect acknowledgement.
    pub connect_timeout_secs: u64,
    /// Base delay for exponential reconnect backoff in seconds.
    pub reconnect_backoff_base_secs: u64,
    /// Upper bound for exponential reconnect backoff in seconds.
    pub reconnect_backoff_max_secs: u64,
    /// Reconnect backoff exponent saturation: min(2^count, 2^cap).
    pub backoff_saturation_count: u32,

    // -- Correlation --
    /// Settle delay for debounced reply subscriptions.
    pub reply_settle_ms: u64,
    /// Seconds before an unanswered correlated request is evicted. 0 = never.
    pub request_timeout_secs: u64,
    /// Delay before re-requesting the sent-requests snapshot after a
    /// handshake-with-message round trip.
    pub sent_requests_refresh_ms: u64,

    // -- Transport --
    /// Maximum frame size in bytes.
    pub max_frame_bytes: usize,
    /// Capacity of the outbound frame queue per link.
    pub outbound_queue: usize,
}

/// Default timing.
///
/// The 10s watchdog assumes the node pings `SET_LAST_SEEN_APP` more often
/// than that; a quiet but healthy channel would otherwise be recycled.
pub const DEFAULT_TIMING: ChannelTiming = ChannelTiming {
    // Liveness
    watchdog_interval_secs: 10,

    // Connect
    connect_debounce_ms: 1000,
    connect_timeout_secs: 20,
    reconnect_backoff_base_secs: 2,
    reconnect_backoff_max_secs: 5 * 60,
    backoff_saturation_count: 5,

    // Correlation
    reply_settle_ms: 1000,
    request_timeout_secs: 60,
    sent_requests_refresh_ms: 500,

    // Transport
    max_frame_bytes: 16 * 1024 * 1024,
    outbound_queue: 256,
};
