//! DHCPv4 client and server.
//!
//! The state machines ([`client::DhcpClient`], [`server::DhcpServer`]) are
//! pure; [`service`] runs them against a [`DhcpTransport`] and applies
//! client results through an
//! [`AddressConfigurator`](crate::netlink::AddressConfigurator).

pub mod client;
pub mod lease;
pub mod packet;
pub mod server;
pub mod service;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;
use tracing::debug;

use crate::BoxFuture;
use crate::netlink::NetlinkError;

pub use client::{ClientState, DhcpClient, DhcpClientStatus, Lease};
pub use lease::{LeasePool, LeaseTable};
pub use packet::{DhcpPacket, MessageType, PacketError};
pub use server::DhcpServer;
pub use service::{DhcpClientService, DhcpServerService};

#[derive(Debug, thiserror::Error)]
pub enum DhcpError {
    #[error("DHCP socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed DHCP packet: {0}")]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Netlink(#[from] NetlinkError),
}

/// Datagram transport for DHCP messages.
pub trait DhcpTransport: Send + Sync {
    /// Send `pkt` to the peer (broadcast for the real transport).
    fn send<'a>(&'a self, pkt: &'a DhcpPacket) -> BoxFuture<'a, Result<(), DhcpError>>;

    /// Receive and decode the next packet.
    fn recv(&self) -> BoxFuture<'_, Result<DhcpPacket, DhcpError>>;
}

/// Largest DHCP datagram accepted.
const MAX_DATAGRAM: usize = 1500;

/// UDP transport sending to a fixed peer address.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind `0.0.0.0:local_port` with broadcast enabled, optionally pinned
    /// to `ifname`, sending to `255.255.255.255:peer_port`.
    pub async fn bind(
        local_port: u16,
        peer_port: u16,
        ifname: Option<&str>,
    ) -> Result<Self, DhcpError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port)).await?;
        socket.set_broadcast(true)?;
        if let Some(ifname) = ifname {
            socket.bind_device(Some(ifname.as_bytes()))?;
        }
        debug!(local_port, peer_port, ?ifname, "DHCP socket bound");
        Ok(Self::with_socket(
            socket,
            SocketAddrV4::new(Ipv4Addr::BROADCAST, peer_port).into(),
        ))
    }

    /// Wrap an already-bound socket.
    pub fn with_socket(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DhcpTransport for UdpTransport {
    fn send<'a>(&'a self, pkt: &'a DhcpPacket) -> BoxFuture<'a, Result<(), DhcpError>> {
        Box::pin(async move {
            self.socket.send_to(&pkt.encode(), self.peer).await?;
            Ok(())
        })
    }

    fn recv(&self) -> BoxFuture<'_, Result<DhcpPacket, DhcpError>> {
        Box::pin(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let (n, _) = self.socket.recv_from(&mut buf).await?;
            Ok(DhcpPacket::decode(&buf[..n])?)
        })
    }
}
