//! Receiver ingress (C7): the authentication handshake, then decrypt +
//! sequence/loss accounting on every incoming datagram. Generalizes the
//! teacher's `connect`/UDP-receive-thread split (`client.rs`) into two
//! cooperative tasks sharing one socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::{HANDSHAKE_TIMEOUT, HEARTBEAT_PERIOD, STREAM_READ_TIMEOUT};
use crate::crypto::{decrypt, hash_pin};
use crate::error::SessionError;
use crate::packet::Packet;
use crate::time::monotonic_now_ns;
use crate::types::{IngressStats, ReceivedPacket};

/// Outcome of the auth handshake (spec.md §4.7, §7).
#[derive(Debug)]
pub enum ConnectionState {
    Authenticated { buffer_ms: u32 },
    Failed(String),
}

/// Send `AUSTREAM_AUTH:<pin_hash>` and interpret the reply within
/// `HANDSHAKE_TIMEOUT`.
pub async fn handshake(
    socket: &UdpSocket,
    server_addr: SocketAddr,
    pin: &str,
) -> ConnectionState {
    let msg = format!("AUSTREAM_AUTH:{}", hash_pin(pin));
    if let Err(e) = socket.send_to(msg.as_bytes(), server_addr).await {
        return ConnectionState::Failed(e.to_string());
    }
    let mut buf = [0u8; 256];
    match timeout(HANDSHAKE_TIMEOUT, socket.recv_from(&mut buf)).await {
        Ok(Ok((n, from))) if from == server_addr => {
            let reply = String::from_utf8_lossy(&buf[..n]);
            if let Some(buffer_ms) = reply.strip_prefix("AUSTREAM_OK:") {
                match buffer_ms.trim().parse::<u32>() {
                    Ok(buffer_ms) => ConnectionState::Authenticated { buffer_ms },
                    Err(_) => ConnectionState::Failed("Unknown response".into()),
                }
            } else if reply.trim() == "AUSTREAM_FAIL" {
                ConnectionState::Failed("Invalid PIN".into())
            } else {
                ConnectionState::Failed("Unknown response".into())
            }
        }
        Ok(Ok(_)) => ConnectionState::Failed("Unknown response".into()),
        Ok(Err(e)) => ConnectionState::Failed(e.to_string()),
        Err(_) => ConnectionState::Failed("handshake timeout".into()),
    }
}

/// Post-authentication ingress: decrypt loop + heartbeat ticker, feeding
/// `ReceivedPacket`s to the play-out scheduler over a channel.
pub struct Ingress {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    key: [u8; crate::config::DERIVED_KEY_LEN],
    stats: Mutex<IngressStats>,
    last_seq: AtomicU64, // high bit unused; None encoded as u64::MAX
}

const NO_SEQ: u64 = u64::MAX;

impl Ingress {
    pub fn new(socket: Arc<UdpSocket>, server_addr: SocketAddr, pin: &str) -> Self {
        Self {
            socket,
            server_addr,
            key: crate::crypto::derive_key(pin),
            stats: Mutex::new(IngressStats::default()),
            last_seq: AtomicU64::new(NO_SEQ),
        }
    }

    pub fn stats(&self) -> IngressStats {
        *self.stats.lock()
    }

    /// `AUSTREAM_HEARTBEAT` every `HEARTBEAT_PERIOD`, for as long as the
    /// caller keeps the returned future polled.
    pub async fn heartbeat_loop(&self) {
        loop {
            tokio::time::sleep(HEARTBEAT_PERIOD).await;
            let _ = self
                .socket
                .send_to(b"AUSTREAM_HEARTBEAT", self.server_addr)
                .await;
        }
    }

    /// Receive loop: parse, decrypt, account for loss, and forward decoded
    /// packets on `tx`. Exits only if the socket errors out or `tx` closes.
    pub async fn recv_loop(&self, tx: mpsc::Sender<ReceivedPacket>) {
        let mut buf = [0u8; 2048];
        loop {
            let (n, from) = match timeout(STREAM_READ_TIMEOUT, self.socket.recv_from(&mut buf)).await
            {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    eprintln!("[INGRESS] recv error: {e}");
                    continue;
                }
                Err(_) => continue, // 100ms pulse, nothing arrived
            };
            if from != self.server_addr {
                continue;
            }
            let recv_local_ns = monotonic_now_ns();
            let packet = match Packet::decode(&buf[..n]) {
                Ok(p) => p,
                Err(_) => continue, // malformed control text or garbage; ignore
            };
            let pcm = match decrypt(&self.key, &packet.payload) {
                Ok(pcm) => pcm,
                Err(_) => {
                    self.stats.lock().decryption_errors += 1;
                    continue;
                }
            };
            self.account_sequence(packet.header.sequence_number);
            {
                let mut stats = self.stats.lock();
                stats.packets_received += 1;
            }
            let received = ReceivedPacket {
                seq: packet.header.sequence_number,
                server_ts: packet.header.timestamp_ns,
                pcm,
                recv_local_ns,
            };
            if tx.send(received).await.is_err() {
                return;
            }
        }
    }

    fn account_sequence(&self, seq: u32) {
        let prev = self.last_seq.swap(seq as u64, Ordering::Relaxed);
        if prev == NO_SEQ {
            return;
        }
        let expected = (prev as u32).wrapping_add(1);
        if seq >= expected {
            let lost = (seq - expected) as u64;
            if lost > 0 {
                self.stats.lock().packets_lost += lost;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{encrypt, hash_pin};
    use crate::packet::PacketHeader;

    #[tokio::test]
    async fn handshake_ok_reports_buffer_ms() {
        let server_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_sock.local_addr().unwrap();
        let client_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (n, from) = server_sock.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], format!("AUSTREAM_AUTH:{}", hash_pin("123456")).as_bytes());
            server_sock.send_to(b"AUSTREAM_OK:50", from).await.unwrap();
        });

        let state = handshake(&client_sock, server_addr, "123456").await;
        match state {
            ConnectionState::Authenticated { buffer_ms } => assert_eq!(buffer_ms, 50),
            other => panic!("expected Authenticated, got {other:?}"),
        }
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_fail_reports_invalid_pin() {
        let server_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_sock.local_addr().unwrap();
        let client_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (_, from) = server_sock.recv_from(&mut buf).await.unwrap();
            server_sock.send_to(b"AUSTREAM_FAIL", from).await.unwrap();
        });

        let state = handshake(&client_sock, server_addr, "000000").await;
        match state {
            ConnectionState::Failed(reason) => assert_eq!(reason, "Invalid PIN"),
            other => panic!("expected Failed, got {other:?}"),
        }
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn recv_loop_tracks_loss_and_decrypt_errors() {
        let server_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_sock.local_addr().unwrap();
        let client_sock = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let client_addr = client_sock.local_addr().unwrap();

        let ingress = Arc::new(Ingress::new(client_sock, server_addr, "123456"));
        let key = crate::crypto::derive_key("123456");
        let (tx, mut rx) = mpsc::channel(16);
        let ingress2 = ingress.clone();
        let recv_task = tokio::spawn(async move { ingress2.recv_loop(tx).await });

        // seq 1
        let pkt1 = Packet {
            header: PacketHeader { sequence_number: 1, timestamp_ns: 100, payload_length: 0 },
            payload: encrypt(&key, b"frame-one"),
        };
        // seq 3 (seq 2 "lost")
        let pkt3 = Packet {
            header: PacketHeader { sequence_number: 3, timestamp_ns: 300, payload_length: 0 },
            payload: encrypt(&key, b"frame-three"),
        };
        for pkt in [pkt1, pkt3] {
            let mut bytes = pkt.encode();
            let real_len = (bytes.len() - crate::packet::HEADER_LEN) as u16;
            bytes[12..14].copy_from_slice(&real_len.to_be_bytes());
            server_sock.send_to(&bytes, client_addr).await.unwrap();
        }

        let first = rx.recv().await.unwrap();
        assert_eq!(first.seq, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.seq, 3);

        let stats = ingress.stats();
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.packets_lost, 1);
        assert_eq!(stats.decryption_errors, 0);

        recv_task.abort();
    }
}
