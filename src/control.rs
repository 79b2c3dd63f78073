//! Control plane (C5): probe / auth / heartbeat / stale-client reaping, all
//! multiplexed onto the single audio/control socket (port A). Generalizes
//! the teacher's `control_loop`/`per_client_control` pair (TCP, one thread
//! per connection) into a single task driving one shared UDP socket with a
//! 100 ms read timeout, so control, heartbeat, and reaping all make
//! progress without their own threads.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::{CLIENT_STALE_AFTER, CONTROL_READ_TIMEOUT, QUEUE_CAPACITY};
use crate::queue::DropOldestQueue;
use crate::scheduler;
use crate::types::AuthenticatedClient;

const PROBE: &str = "AUSTREAM_PROBE";
const AUTH_PREFIX: &str = "AUSTREAM_AUTH:";
const CLIENT_LEGACY_PREFIX: &str = "AUSTREAM_CLIENT";
const HEARTBEAT: &str = "AUSTREAM_HEARTBEAT";

fn alive_reply(hostname: &str) -> String {
    format!("AUSTREAM_ALIVE:{hostname}")
}

fn ok_reply(buffer_ms: u32) -> String {
    format!("AUSTREAM_OK:{buffer_ms}")
}

const FAIL_REPLY: &str = "AUSTREAM_FAIL";
const NEED_PIN_REPLY: &str = "AUSTREAM_NEED_PIN";

/// One authenticated client's queue + dedicated drain task (spec.md §3/§4.6).
pub struct ClientHandle {
    pub client: AuthenticatedClient,
    pub queue: Arc<DropOldestQueue<Vec<u8>>>,
    send_task: JoinHandle<()>,
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.queue.close();
        self.send_task.abort();
    }
}

/// Sender-side control plane: owns the authenticated-clients table and the
/// shared socket they send/receive on.
pub struct ControlPlane {
    socket: Arc<UdpSocket>,
    clients: Arc<DashMap<SocketAddr, ClientHandle>>,
    pin_hash: String,
    buffer_ms: u32,
    queue_capacity: usize,
    hostname: String,
}

impl ControlPlane {
    pub fn new(
        socket: Arc<UdpSocket>,
        pin_hash: String,
        buffer_ms: u32,
        queue_capacity: usize,
        hostname: String,
    ) -> Self {
        Self {
            socket,
            clients: Arc::new(DashMap::new()),
            pin_hash,
            buffer_ms,
            queue_capacity,
            hostname,
        }
    }

    /// Snapshot of currently authenticated client addresses, used by the
    /// fan-out step (C6) to enumerate per-client queues.
    pub fn clients(&self) -> Arc<DashMap<SocketAddr, ClientHandle>> {
        self.clients.clone()
    }

    /// Drive control messages, heartbeats, and stale-client reaping until
    /// cancelled.
    pub async fn run(&self) {
        let mut buf = [0u8; 1024];
        loop {
            match timeout(CONTROL_READ_TIMEOUT, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((n, from))) => {
                    self.handle_datagram(&buf[..n], from).await;
                }
                Ok(Err(e)) => {
                    eprintln!("[CONTROL] recv error: {e}");
                }
                Err(_) => { /* 100ms pulse with no datagram; fall through to reap */ }
            }
            self.reap_stale_clients();
        }
    }

    async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        let Ok(text) = std::str::from_utf8(bytes) else {
            return; // a binary datagram here can only be a malformed client; ignore
        };
        let text = text.trim();

        if text == PROBE {
            let _ = self.socket.send_to(alive_reply(&self.hostname).as_bytes(), from).await;
        } else if let Some(pin_hash) = text.strip_prefix(AUTH_PREFIX) {
            self.handle_auth(pin_hash, from).await;
        } else if text.starts_with(CLIENT_LEGACY_PREFIX) {
            let _ = self.socket.send_to(NEED_PIN_REPLY.as_bytes(), from).await;
        } else if text == HEARTBEAT {
            if let Some(handle) = self.clients.get(&from) {
                handle.client.touch();
            }
        }
    }

    async fn handle_auth(&self, pin_hash: &str, from: SocketAddr) {
        if pin_hash != self.pin_hash {
            let _ = self.socket.send_to(FAIL_REPLY.as_bytes(), from).await;
            return;
        }
        let queue = DropOldestQueue::new(self.queue_capacity);
        let send_task = scheduler::spawn_send_task(self.socket.clone(), from, queue.clone());
        let handle = ClientHandle {
            client: AuthenticatedClient::new(from),
            queue,
            send_task,
        };
        // Replacing an existing entry (re-auth from the same endpoint) drops
        // the old ClientHandle, which tears down its queue and send task.
        self.clients.insert(from, handle);
        let _ = self.socket.send_to(ok_reply(self.buffer_ms).as_bytes(), from).await;
    }

    fn reap_stale_clients(&self) {
        let now = std::time::Instant::now();
        self.clients
            .retain(|_, handle| !handle.client.is_stale(now, CLIENT_STALE_AFTER));
    }
}
