//! Per-client send scheduler (C6): one dedicated task per authenticated
//! client, draining that client's bounded drop-oldest queue and writing each
//! packet to the wire. Mirrors the teacher's per-client thread shape
//! (`per_client_control`) but drains a queue instead of a TCP stream.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::queue::DropOldestQueue;

/// Spawn the drain task for one client. Exits once `queue` is closed and
/// drained (client reaped, or sender session stopped).
pub fn spawn_send_task(
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    queue: Arc<DropOldestQueue<Vec<u8>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(datagram) = queue.pop().await {
            if let Err(e) = socket.send_to(&datagram, addr).await {
                eprintln!("[SCHEDULER] sendto {addr} failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_offered_packets_to_a_real_socket() {
        let send_sock = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let recv_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let recv_addr = recv_sock.local_addr().unwrap();

        let queue = DropOldestQueue::new(4);
        let task = spawn_send_task(send_sock, recv_addr, queue.clone());

        queue.offer(vec![1, 2, 3]);
        let mut buf = [0u8; 16];
        let (n, _) = recv_sock.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);

        queue.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
