//! Socket seam shared by every transport

use tokio::sync::mpsc;

use partage_core::{NodeAddr, PartageResult};
use partage_wire::Packet;

/// Channel capacity of a socket's receive side
pub const RECEIVE_BUFFER: usize = 1024;

/// Datagrams a socket may queue before sends start failing
pub const SEND_BUFFER: usize = 1024;

/// Decoded packets delivered by a socket
pub type PacketReceiver = mpsc::Receiver<Packet>;

/// Datagram socket addressed by [`NodeAddr`]
///
/// Sends are fire-and-forget: success means the packet was handed to the
/// socket, not that it arrived.
pub trait Socket: Send + Sync {
    fn local_addr(&self) -> NodeAddr;

    /// Send a packet to a directly reachable peer
    fn send(&self, next_hop: &NodeAddr, packet: &Packet) -> PartageResult<()>;
}
