//! Session-wide constants and the small config knobs spec.md calls out as
//! "should be configurable" (silence threshold, buffer_ms).

use std::time::Duration;

/// 48 kHz stereo s16le, 10 ms capture unit.
pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;
pub const FRAME_MS: u32 = 10;
pub const FRAME_BYTES: usize = 1920;
pub const FRAME_SAMPLES: usize = FRAME_BYTES / 2; // i16 samples, both channels interleaved

/// Fixed salt used for both PBKDF2 key derivation and the PIN hash (spec.md §3).
pub const SESSION_SALT: &str = "AuStreamSalt2024";
pub const PBKDF2_ITERATIONS: u32 = 10_000;
pub const DERIVED_KEY_LEN: usize = 32;

pub const DEFAULT_PORT_A: u16 = 5004;
pub const DEFAULT_PORT_T: u16 = 5005;

/// Per-client send queue capacity (C6) and playback-buffer bound (C7/C8).
pub const QUEUE_CAPACITY: usize = 50;
pub const PLAYBACK_MAP_CAPACITY: usize = 50;

pub const CLIENT_STALE_AFTER: Duration = Duration::from_secs(10);
pub const CONTROL_READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const REAP_PULSE: Duration = Duration::from_millis(100);
pub const KEEPALIVE_SILENCE_AFTER: Duration = Duration::from_secs(2);

pub const CLOCK_SYNC_CADENCE: Duration = Duration::from_secs(2);
pub const CLOCK_SYNC_TIMEOUT: Duration = Duration::from_secs(1);
pub const CLOCK_TELEMETRY_PRUNE_INTERVAL: Duration = Duration::from_secs(30);
pub const CLOCK_TELEMETRY_MAX_AGE: Duration = Duration::from_secs(60);

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
pub const STREAM_READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

pub const PREROLL_CAP: Duration = Duration::from_secs(3);
pub const PLAYOUT_TICK_FLOOR: Duration = Duration::from_millis(1);
pub const PLAYOUT_TICK_CEIL: Duration = Duration::from_millis(10);

/// Default silence threshold (spec.md §9: "arbitrary... start at 200").
pub const DEFAULT_SILENCE_THRESHOLD: i16 = 200;
/// Up to this many evenly-spaced samples are inspected per frame.
pub const SILENCE_SAMPLE_BUDGET: usize = 100;

/// Default pre-roll latency honoured by the receiver, in the absence of a
/// server-suggested value (spec.md adopts the server-suggested value as the
/// source of truth once authenticated; this is only the sender's default
/// advertisement).
pub const DEFAULT_BUFFER_MS: u32 = 50;

/// Sender-side tunables, constructible from CLI flags. Nothing in spec.md or
/// the teacher calls for a config *file* format, so this stays a plain struct.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port_a: u16,
    pub port_t: u16,
    pub buffer_ms: u32,
    pub silence_threshold: i16,
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_a: DEFAULT_PORT_A,
            port_t: DEFAULT_PORT_T,
            buffer_ms: DEFAULT_BUFFER_MS,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            queue_capacity: QUEUE_CAPACITY,
        }
    }
}
