//! Shared data model types (§3) and the `Capture`/`Sink` collaborator
//! traits (§9) that keep the capture/render hardware out of the core.

use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::FRAME_BYTES;

/// A lazy sequence of 1920-byte s16le stereo capture-units. Finite across a
/// session, not restartable — mirrors the teacher's callback-driven
/// `build_input_stream`, generalized behind a trait so tests can drive the
/// pipeline without `cpal`.
#[async_trait]
pub trait Capture: Send {
    async fn next_frame(&mut self) -> Option<[u8; FRAME_BYTES]>;
}

/// Consumes decoded PCM frames and accepts a linear gain in `[0, 1]`.
pub trait Sink: Send {
    fn write_frame(&mut self, pcm: &[i16]);
    fn set_gain(&mut self, gain: f32);
}

/// A `Capture` backed by a channel, used by the CLI's `cpal` adapter and by
/// tests that want to push frames in directly.
pub struct ChannelCapture {
    pub rx: mpsc::Receiver<[u8; FRAME_BYTES]>,
}

#[async_trait]
impl Capture for ChannelCapture {
    async fn next_frame(&mut self) -> Option<[u8; FRAME_BYTES]> {
        self.rx.recv().await
    }
}

/// Sender-side authenticated client entry (spec.md §3).
pub struct AuthenticatedClient {
    pub addr: SocketAddr,
    pub last_seen: parking_lot::Mutex<Instant>,
    pub authenticated: std::sync::atomic::AtomicBool,
}

impl AuthenticatedClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            last_seen: parking_lot::Mutex::new(Instant::now()),
            authenticated: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn is_stale(&self, now: Instant, stale_after: std::time::Duration) -> bool {
        now.duration_since(*self.last_seen.lock()) > stale_after
    }
}

/// A decoded, authenticated datagram handed to the receiver's play-out
/// scheduler (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    pub seq: u32,
    pub server_ts: i64,
    pub pcm: Vec<u8>,
    pub recv_local_ns: i64,
}

/// Rolling ingress counters (spec.md §4.7, S1/S3 scenarios).
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct IngressStats {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub decryption_errors: u64,
}
