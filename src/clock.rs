//! Clock-sync protocol (C3): NTP-4-timestamp offset/RTT exchange over the
//! time socket (port T). Stateless server save a soft telemetry set.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

use crate::config::{
    CLOCK_SYNC_CADENCE, CLOCK_SYNC_TIMEOUT, CLOCK_TELEMETRY_MAX_AGE,
    CLOCK_TELEMETRY_PRUNE_INTERVAL,
};
use crate::time::monotonic_now_ns;

const REQUEST_LEN: usize = 8;
const RESPONSE_LEN: usize = 24;

/// Shared, atomically-updated offset/RTT estimate (receiver side).
#[derive(Default)]
pub struct ClockState {
    offset_ns: AtomicI64,
    rtt_ns: AtomicI64,
}

impl ClockState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn offset_ns(&self) -> i64 {
        self.offset_ns.load(Ordering::Relaxed)
    }

    pub fn rtt_ns(&self) -> i64 {
        self.rtt_ns.load(Ordering::Relaxed)
    }

    fn update(&self, offset_ns: i64, rtt_ns: i64) {
        self.offset_ns.store(offset_ns, Ordering::Relaxed);
        self.rtt_ns.store(rtt_ns, Ordering::Relaxed);
    }
}

/// Encode an 8-byte clock-sync request carrying the client's `t1`.
fn encode_request(t1: i64) -> [u8; REQUEST_LEN] {
    t1.to_be_bytes()
}

fn decode_request(buf: &[u8]) -> Option<i64> {
    if buf.len() != REQUEST_LEN {
        return None;
    }
    Some(i64::from_be_bytes(buf[0..8].try_into().unwrap()))
}

fn encode_response(t1_echo: i64, t2: i64, t3: i64) -> [u8; RESPONSE_LEN] {
    let mut out = [0u8; RESPONSE_LEN];
    out[0..8].copy_from_slice(&t1_echo.to_be_bytes());
    out[8..16].copy_from_slice(&t2.to_be_bytes());
    out[16..24].copy_from_slice(&t3.to_be_bytes());
    out
}

fn decode_response(buf: &[u8]) -> Option<(i64, i64, i64)> {
    if buf.len() != RESPONSE_LEN {
        return None;
    }
    let t1_echo = i64::from_be_bytes(buf[0..8].try_into().unwrap());
    let t2 = i64::from_be_bytes(buf[8..16].try_into().unwrap());
    let t3 = i64::from_be_bytes(buf[16..24].try_into().unwrap());
    Some((t1_echo, t2, t3))
}

/// Receiver-side clock-sync loop: one request every `CLOCK_SYNC_CADENCE`
/// with a `CLOCK_SYNC_TIMEOUT` receive timeout. A dropped reply is silently
/// retried on the next tick (spec.md §4.3).
pub async fn run_client(socket: Arc<UdpSocket>, server_addr: SocketAddr, state: Arc<ClockState>) {
    let mut buf = [0u8; 512];
    loop {
        let t1 = monotonic_now_ns();
        if socket.send_to(&encode_request(t1), server_addr).await.is_ok() {
            match timeout(CLOCK_SYNC_TIMEOUT, socket.recv_from(&mut buf)).await {
                Ok(Ok((n, from))) if from == server_addr => {
                    let t4 = monotonic_now_ns();
                    if let Some((t1_echo, t2, t3)) = decode_response(&buf[..n]) {
                        if t1_echo == t1 {
                            let offset = ((t2 - t1_echo) + (t3 - t4)) / 2;
                            let rtt = (t4 - t1_echo) - (t3 - t2);
                            state.update(offset, rtt);
                        }
                    }
                }
                _ => { /* dropped reply or timeout: silently retry next tick */ }
            }
        }
        tokio::time::sleep(CLOCK_SYNC_CADENCE).await;
    }
}

/// Sender-side clock-sync server: stateless reply per request, plus a soft
/// "recently active" telemetry set pruned every 30s (entries >60s dropped).
pub struct ClockSyncServer {
    recently_active: Arc<DashMap<SocketAddr, Instant>>,
}

impl ClockSyncServer {
    pub fn new() -> Self {
        Self {
            recently_active: Arc::new(DashMap::new()),
        }
    }

    /// Snapshot of addresses that have synced within the telemetry window.
    pub fn recently_active_count(&self) -> usize {
        self.recently_active.len()
    }

    pub async fn run(&self, socket: Arc<UdpSocket>) {
        let prune_active = self.recently_active.clone();
        let _prune_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(CLOCK_TELEMETRY_PRUNE_INTERVAL).await;
                let now = Instant::now();
                prune_active.retain(|_, last| now.duration_since(*last) <= CLOCK_TELEMETRY_MAX_AGE);
            }
        });

        let mut buf = [0u8; 512];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, from)) => {
                    if let Some(t1_echo) = decode_request(&buf[..n]) {
                        let t2 = monotonic_now_ns();
                        self.recently_active.insert(from, Instant::now());
                        let t3 = monotonic_now_ns();
                        let resp = encode_response(t1_echo, t2, t3);
                        let _ = socket.send_to(&resp, from).await;
                    }
                }
                Err(e) => {
                    eprintln!("[CLOCK] recv error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

impl Default for ClockSyncServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_response_round_trip() {
        let t1 = 1_000_000i64;
        let req = encode_request(t1);
        assert_eq!(decode_request(&req), Some(t1));

        let resp = encode_response(t1, 2_000_000, 3_000_000);
        assert_eq!(decode_response(&resp), Some((t1, 2_000_000, 3_000_000)));
    }

    #[test]
    fn offset_formula_is_symmetric_rtt_independent_of_processing_delay() {
        // Client sends at t1. Network delay `r/2` each way, server processing delay `d`.
        let true_offset: i64 = 5_000_000; // server clock is 5ms ahead of client clock
        let r: i64 = 4_000_000; // symmetric RTT
        for d in [0i64, 1_000_000, 10_000_000] {
            let t1 = 0i64;
            let t2 = t1 + r / 2 + true_offset;
            let t3 = t2 + d;
            let t4 = t1 + r + d;
            let offset = ((t2 - t1) + (t3 - t4)) / 2;
            let rtt = (t4 - t1) - (t3 - t2);
            assert_eq!(offset, true_offset);
            assert_eq!(rtt, r);
        }
    }

    #[tokio::test]
    async fn client_and_server_converge_on_offset() {
        let server_sock = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = server_sock.local_addr().unwrap();
        let server = Arc::new(ClockSyncServer::new());
        let server_task = {
            let server = server.clone();
            let sock = server_sock.clone();
            tokio::spawn(async move { server.run(sock).await })
        };

        let client_sock = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let state = ClockState::new();
        // Drive one round manually instead of the full 2s-cadence loop.
        let t1 = monotonic_now_ns();
        client_sock
            .send_to(&encode_request(t1), server_addr)
            .await
            .unwrap();
        let mut buf = [0u8; 512];
        let (n, _) = timeout(Duration::from_secs(1), client_sock.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let t4 = monotonic_now_ns();
        let (t1_echo, t2, t3) = decode_response(&buf[..n]).unwrap();
        assert_eq!(t1_echo, t1);
        let offset = ((t2 - t1_echo) + (t3 - t4)) / 2;
        let rtt = (t4 - t1_echo) - (t3 - t2);
        state.update(offset, rtt);
        assert!(state.rtt_ns() >= 0);
        assert_eq!(server.recently_active_count(), 1);
        server_task.abort();
    }
}
