//! `SenderSession` (spec.md §2, §5): wires capture → silence-gate (C4) →
//! frame+encrypt (C1/C2) → per-client fan-out (C6), plus the control plane
//! (C5), clock-sync server (C3), and the keep-alive ticker, behind one
//! session value whose lifetime is the stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::clock::ClockSyncServer;
use crate::config::{SessionConfig, FRAME_BYTES, KEEPALIVE_SILENCE_AFTER};
use crate::control::ControlPlane;
use crate::crypto::{derive_key, hash_pin};
use crate::error::SessionError;
use crate::packet::{Packet, PacketHeader};
use crate::silence::{is_silent, silence_frame};
use crate::time::monotonic_now_ns;
use crate::types::Capture;

pub struct SenderSession {
    audio_socket: Arc<UdpSocket>,
    time_socket: Arc<UdpSocket>,
    control: Arc<ControlPlane>,
    clock_server: Arc<ClockSyncServer>,
    config: SessionConfig,
    key: [u8; crate::config::DERIVED_KEY_LEN],
    sequence: AtomicU32,
    last_emit_ns: AtomicI64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SenderSession {
    /// Bind both UDP endpoints (port A, port T) and derive session key
    /// material from `pin`. Port collisions are fatal to session start
    /// (spec.md §4 "Failure semantics (sender)").
    pub async fn bind(
        pin: &str,
        config: SessionConfig,
        hostname: String,
    ) -> Result<Arc<Self>, SessionError> {
        let audio_socket = Arc::new(
            UdpSocket::bind(("0.0.0.0", config.port_a))
                .await
                .map_err(SessionError::Transport)?,
        );
        let time_socket = Arc::new(
            UdpSocket::bind(("0.0.0.0", config.port_t))
                .await
                .map_err(SessionError::Transport)?,
        );
        let control = Arc::new(ControlPlane::new(
            audio_socket.clone(),
            hash_pin(pin),
            config.buffer_ms,
            config.queue_capacity,
            hostname,
        ));
        let now = monotonic_now_ns();
        println!(
            "[SENDER] bound audio={} time={}",
            config.port_a, config.port_t
        );
        Ok(Arc::new(Self {
            audio_socket,
            time_socket,
            control,
            clock_server: Arc::new(ClockSyncServer::new()),
            key: derive_key(pin),
            sequence: AtomicU32::new(0),
            last_emit_ns: AtomicI64::new(now),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn local_audio_addr(&self) -> std::io::Result<SocketAddr> {
        self.audio_socket.local_addr()
    }

    /// Start the control plane, clock-sync server, and keep-alive ticker.
    /// Capture is driven separately via [`SenderSession::run_capture`] since
    /// its concrete `Capture` type varies (real hardware vs. a test double).
    pub fn start_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        let control = self.control.clone();
        tasks.push(tokio::spawn(async move { control.run().await }));

        let clock_server = self.clock_server.clone();
        let time_socket = self.time_socket.clone();
        tasks.push(tokio::spawn(
            async move { clock_server.run(time_socket).await },
        ));

        let this = self.clone();
        tasks.push(tokio::spawn(async move { this.keepalive_loop().await }));
    }

    /// Drive a `Capture` source to completion (or until cancelled): gate
    /// silence, frame, encrypt, fan out.
    pub async fn run_capture<C: Capture>(&self, mut capture: C) {
        while let Some(frame) = capture.next_frame().await {
            if is_silent(&frame, self.config.silence_threshold) {
                continue;
            }
            self.emit(&frame).await;
        }
    }

    async fn keepalive_loop(&self) {
        let keepalive_ns = KEEPALIVE_SILENCE_AFTER.as_nanos() as i64;
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            let idle_ns = monotonic_now_ns() - self.last_emit_ns.load(Ordering::Relaxed);
            if idle_ns >= keepalive_ns && !self.control.clients().is_empty() {
                self.emit(&silence_frame(FRAME_BYTES)).await;
            }
        }
    }

    /// Build, encrypt, and fan out a single capture-unit. Used both by the
    /// gated capture path and by the keep-alive synthetic frame.
    async fn emit(&self, frame: &[u8]) {
        let sequence_number = self.sequence.fetch_add(1, Ordering::SeqCst);
        let timestamp_ns = monotonic_now_ns();
        let payload = crate::crypto::encrypt(&self.key, frame);
        let packet = Packet {
            header: PacketHeader {
                sequence_number,
                timestamp_ns,
                payload_length: payload.len() as u16,
            },
            payload,
        };
        let bytes = packet.encode();
        for entry in self.control.clients().iter() {
            entry.value().queue.offer(bytes.clone());
        }
        self.last_emit_ns.store(timestamp_ns, Ordering::Relaxed);
    }

    /// Tear the session down: cancel background tasks, drop all clients
    /// (closing their queues and send tasks), and reset sequence numbering
    /// for a subsequent session (spec.md §5, `stop()`).
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.control.clients().clear();
        self.sequence.store(0, Ordering::SeqCst);
        println!("[SENDER] stopped, sequence reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FRAME_BYTES;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct VecCapture {
        rx: mpsc::Receiver<[u8; FRAME_BYTES]>,
    }

    #[async_trait]
    impl Capture for VecCapture {
        async fn next_frame(&mut self) -> Option<[u8; FRAME_BYTES]> {
            self.rx.recv().await
        }
    }

    #[tokio::test]
    async fn silent_frames_never_advance_sequence() {
        let config = SessionConfig {
            port_a: 0,
            port_t: 0,
            ..SessionConfig::default()
        };
        let session = SenderSession::bind("123456", config, "host".into())
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(4);
        tx.send([0u8; FRAME_BYTES]).await.unwrap();
        drop(tx);
        session.run_capture(VecCapture { rx }).await;
        assert_eq!(session.sequence.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn loud_frame_advances_sequence_once() {
        let config = SessionConfig {
            port_a: 0,
            port_t: 0,
            ..SessionConfig::default()
        };
        let session = SenderSession::bind("123456", config, "host".into())
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(4);
        let mut loud = [0u8; FRAME_BYTES];
        loud[0] = 0xff;
        loud[1] = 0x7f; // i16 max, little-endian
        tx.send(loud).await.unwrap();
        drop(tx);
        session.run_capture(VecCapture { rx }).await;
        assert_eq!(session.sequence.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_resets_sequence() {
        let config = SessionConfig {
            port_a: 0,
            port_t: 0,
            ..SessionConfig::default()
        };
        let session = SenderSession::bind("123456", config, "host".into())
            .await
            .unwrap();
        session.sequence.store(42, Ordering::SeqCst);
        session.stop();
        assert_eq!(session.sequence.load(Ordering::SeqCst), 0);
    }
}
