//! UDP multicast transport and the node event loop.
//!
//! One socket, one task. The socket is bound with `SO_REUSEADDR` so several
//! nodes on one host can share the cluster port, then joined to the group.
//! The loop holds a single receive slot and interleaves exactly three kinds
//! of work: receiving datagrams, delivering timer expirations, and flushing
//! the node's outbound queue one send at a time in enqueue order.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::node::{ClusterError, Node, Target, CLUSTER_PORT};
use crate::timer::MuxTimer;
use crate::wire::MAX_PACKET_LEN;

pub struct Transport {
    socket: UdpSocket,
    group: SocketAddr,
}

impl Transport {
    /// Bind the shared cluster socket and join the multicast group.
    pub fn open(listen: IpAddr, group: IpAddr) -> Result<Self, ClusterError> {
        if !group.is_multicast() {
            return Err(ClusterError::NotMulticast(group));
        }

        let domain = if listen.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        // Several nodes on one host share the port.
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::new(listen, CLUSTER_PORT).into())?;
        socket.set_nonblocking(true)?;

        match (listen, group) {
            (IpAddr::V4(_), IpAddr::V4(group)) => {
                socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?
            }
            (IpAddr::V6(_), IpAddr::V6(group)) => socket.join_multicast_v6(&group, 0)?,
            _ => return Err(ClusterError::AddressFamilyMismatch { listen, group }),
        }

        let socket = UdpSocket::from_std(socket.into())?;
        info!("listening on {}:{}, group {}", listen, CLUSTER_PORT, group);
        Ok(Transport { socket, group: SocketAddr::new(group, CLUSTER_PORT) })
    }
}

/// Drive a node until a fatal error.
///
/// The node, the receive slot and the timer all live on this one task, which
/// is the whole concurrency model: handlers never block, every suspension
/// point is in this loop.
pub async fn run(mut node: Node, transport: Transport) -> Result<(), ClusterError> {
    let mut timer = MuxTimer::new();
    let mut slot = [0u8; MAX_PACKET_LEN];

    node.start();
    flush(&mut node, &transport, &mut timer).await;

    loop {
        tokio::select! {
            received = transport.socket.recv_from(&mut slot) => match received {
                Ok((len, src)) => node.handle_datagram(&slot[..len], src)?,
                Err(e) => {
                    // Oversized datagrams and transient errors are absorbed;
                    // the receive is re-armed on the next iteration.
                    warn!("receive error: {e}");
                }
            },
            purpose = timer.expired() => {
                debug!("timer fired: {purpose:?}");
                timer.clear();
                node.handle_timeout(purpose);
            }
        }

        flush(&mut node, &transport, &mut timer).await;
    }
}

/// Send queued frames in order, then apply the node's timer command.
async fn flush(node: &mut Node, transport: &Transport, timer: &mut MuxTimer) {
    while let Some(outgoing) = node.take_outgoing() {
        let dest = match outgoing.target {
            Target::Group => transport.group,
            Target::Peer(addr) => addr,
        };
        if let Err(e) = transport.socket.send_to(outgoing.frame.bytes(), dest).await {
            warn!("send to {dest} failed: {e}");
        }
    }
    if let Some(cmd) = node.take_timer() {
        timer.arm(cmd);
    }
}
