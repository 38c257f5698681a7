//! UDP transport implementation

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use partage_core::{NodeAddr, PartageError, PartageResult};
use partage_wire::{Packet, MAX_PACKET_SIZE};

use crate::{PacketReceiver, Socket, SEND_BUFFER};

/// UDP socket carrying JSON-encoded packets.
///
/// Outgoing datagrams go through a writer task that awaits socket
/// readiness, so [`Socket::send`] never fails on a busy socket.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    outgoing: mpsc::Sender<(Vec<u8>, SocketAddr)>,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> PartageResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| PartageError::TransportError(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| PartageError::TransportError(e.to_string()))?;

        let socket = Arc::new(socket);
        let (outgoing, queue) = mpsc::channel(SEND_BUFFER);
        tokio::spawn(write_loop(Arc::clone(&socket), queue));

        Ok(UdpTransport {
            socket,
            local_addr,
            outgoing,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the background receive loop.
    ///
    /// Datagrams that fail to decode are logged and dropped. The loop ends
    /// when the returned receiver is dropped.
    pub fn start_receive_loop(&self, buffer_size: usize) -> PacketReceiver {
        let (tx, rx) = mpsc::channel(buffer_size);
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, addr)) => match Packet::decode(&buf[..len]) {
                        Ok(packet) => {
                            if tx.send(packet).await.is_err() {
                                break; // Receiver dropped
                            }
                        }
                        Err(e) => {
                            tracing::debug!(from = %addr, error = %e, "dropping undecodable datagram");
                        }
                    },
                    Err(e) => {
                        tracing::warn!("UDP receive error: {}", e);
                    }
                }
            }
        });

        rx
    }
}

/// Drain queued datagrams until the transport is dropped
async fn write_loop(socket: Arc<UdpSocket>, mut queue: mpsc::Receiver<(Vec<u8>, SocketAddr)>) {
    while let Some((bytes, dest)) = queue.recv().await {
        if let Err(e) = socket.send_to(&bytes, dest).await {
            tracing::warn!(to = %dest, "UDP send error: {}", e);
        }
    }
}

impl Socket for UdpTransport {
    fn local_addr(&self) -> NodeAddr {
        NodeAddr::new(self.local_addr.to_string())
    }

    fn send(&self, next_hop: &NodeAddr, packet: &Packet) -> PartageResult<()> {
        let dest: SocketAddr = next_hop
            .as_str()
            .parse()
            .map_err(|_| PartageError::PeerUnreachable(next_hop.clone()))?;
        let bytes = packet.encode()?;
        self.outgoing.try_send((bytes, dest)).map_err(|e| match e {
            TrySendError::Full(_) => PartageError::TransportError("send queue full".into()),
            TrySendError::Closed(_) => PartageError::TransportError("socket writer stopped".into()),
        })
    }
}
