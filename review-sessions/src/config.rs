//! Session bounds from environment variables.

/// TTL, capacity, and housekeeping knobs.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Terminal sessions are evicted this many ms after finishing.
    pub ttl_ms: u64,
    /// LRU cap on concurrently stored sessions.
    pub max_sessions: usize,
    /// Housekeeping cadence.
    pub housekeeping_interval_ms: u64,
    /// Active sessions quiet for this long are marked stalled.
    pub stall_after_ms: u64,
    /// Pacing between step dispatches; 0 dispatches as fast as workers free
    /// up.
    pub dispatch_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 3_600_000,
            max_sessions: 100,
            housekeeping_interval_ms: 30_000,
            stall_after_ms: 120_000,
            dispatch_delay_ms: 0,
        }
    }
}

impl SessionConfig {
    /// Recognized vars: REACTIVE_SESSION_TTL (ms), REACTIVE_MAX_SESSIONS.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl_ms: std::env::var("REACTIVE_SESSION_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.ttl_ms),
            max_sessions: std::env::var("REACTIVE_MAX_SESSIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_sessions),
            housekeeping_interval_ms: defaults.housekeeping_interval_ms,
            stall_after_ms: defaults.stall_after_ms,
            dispatch_delay_ms: defaults.dispatch_delay_ms,
        }
    }
}
