//! `ReceiverSession` (spec.md §2, §5): handshake, then the heartbeat
//! ticker, UDP receive loop, play-out loop, and clock-sync loop running
//! concurrently off one session value.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::ClockState;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::ingress::{handshake, ConnectionState, Ingress};
use crate::playout::PlayoutScheduler;
use crate::types::Sink;

pub struct ReceiverSession<S: Sink + 'static> {
    time_socket: Arc<UdpSocket>,
    time_addr: SocketAddr,
    ingress: Arc<Ingress>,
    playout: Arc<PlayoutScheduler<S>>,
    clock_state: Arc<ClockState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn resolve_one(host: &str, port: u16) -> Result<SocketAddr, SessionError> {
    (host, port)
        .to_socket_addrs()
        .map_err(SessionError::Transport)?
        .next()
        .ok_or_else(|| SessionError::Failed(format!("could not resolve {host}:{port}")))
}

impl<S: Sink + 'static> ReceiverSession<S> {
    /// Resolve `host`, run the auth handshake, and build the session around
    /// the server-suggested `buffer_ms` (spec.md §9: adopt the server's
    /// suggestion rather than a hard-coded client value).
    pub async fn connect(
        host: &str,
        config: &SessionConfig,
        pin: &str,
        sink: S,
    ) -> Result<Arc<Self>, SessionError> {
        let server_addr = resolve_one(host, config.port_a)?;
        let time_addr = resolve_one(host, config.port_t)?;

        let audio_socket = Arc::new(
            UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(SessionError::Transport)?,
        );
        let time_socket = Arc::new(
            UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(SessionError::Transport)?,
        );

        let buffer_ms = match handshake(&audio_socket, server_addr, pin).await {
            ConnectionState::Authenticated { buffer_ms } => buffer_ms,
            ConnectionState::Failed(reason) if reason == "Invalid PIN" => {
                return Err(SessionError::InvalidPin)
            }
            ConnectionState::Failed(reason) => return Err(SessionError::Failed(reason)),
        };

        let ingress = Arc::new(Ingress::new(audio_socket, server_addr, pin));
        let playout = Arc::new(PlayoutScheduler::new(buffer_ms, sink));

        Ok(Arc::new(Self {
            time_socket,
            time_addr,
            ingress,
            playout,
            clock_state: ClockState::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn ingress_stats(&self) -> crate::types::IngressStats {
        self.ingress.stats()
    }

    pub fn set_gain(&self, gain: f32) {
        self.playout.set_gain(gain);
    }

    pub fn clock_state(&self) -> Arc<ClockState> {
        self.clock_state.clone()
    }

    /// Start the heartbeat ticker, receive loop, play-out loop, and
    /// clock-sync client — all concurrent, all cancellable on [`Self::stop`].
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        let (tx, rx) = mpsc::channel(128);

        let ingress = self.ingress.clone();
        tasks.push(tokio::spawn(async move { ingress.heartbeat_loop().await }));

        let ingress = self.ingress.clone();
        tasks.push(tokio::spawn(async move { ingress.recv_loop(tx).await }));

        let playout = self.playout.clone();
        tasks.push(tokio::spawn(async move { playout.feed_loop(rx).await }));

        let playout = self.playout.clone();
        tasks.push(tokio::spawn(async move { playout.play_loop().await }));

        let time_socket = self.time_socket.clone();
        let time_addr = self.time_addr;
        let clock_state = self.clock_state.clone();
        tasks.push(tokio::spawn(async move {
            crate::clock::run_client(time_socket, time_addr, clock_state).await
        }));
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
