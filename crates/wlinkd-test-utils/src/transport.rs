//! In-memory [`DhcpTransport`] for driving the DHCP services.

use tokio::sync::{Mutex, mpsc};
use wlinkd_core::BoxFuture;
use wlinkd_core::dhcp::{DhcpError, DhcpPacket, DhcpTransport};

/// Transport whose peer is the test: packets the service sends come out of
/// [`TransportPeer::sent`], packets pushed with [`TransportPeer::deliver`]
/// are what it receives.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<DhcpPacket>,
    inbound: Mutex<mpsc::UnboundedReceiver<DhcpPacket>>,
}

pub struct TransportPeer {
    sent: mpsc::UnboundedReceiver<DhcpPacket>,
    deliver: mpsc::UnboundedSender<DhcpPacket>,
}

impl TransportPeer {
    /// Next packet sent by the service.
    pub async fn sent(&mut self) -> DhcpPacket {
        self.sent.recv().await.expect("transport dropped")
    }

    pub fn try_sent(&mut self) -> Option<DhcpPacket> {
        self.sent.try_recv().ok()
    }

    pub fn deliver(&self, pkt: DhcpPacket) {
        let _ = self.deliver.send(pkt);
    }
}

pub fn channel_transport() -> (ChannelTransport, TransportPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            outbound: out_tx,
            inbound: Mutex::new(in_rx),
        },
        TransportPeer {
            sent: out_rx,
            deliver: in_tx,
        },
    )
}

impl DhcpTransport for ChannelTransport {
    fn send<'a>(&'a self, pkt: &'a DhcpPacket) -> BoxFuture<'a, Result<(), DhcpError>> {
        let _ = self.outbound.send(pkt.clone());
        Box::pin(async { Ok(()) })
    }

    fn recv(&self) -> BoxFuture<'_, Result<DhcpPacket, DhcpError>> {
        Box::pin(async move {
            match self.inbound.lock().await.recv().await {
                Some(pkt) => Ok(pkt),
                // Peer gone: look like a quiet network rather than a dead socket.
                None => std::future::pending().await,
            }
        })
    }
}
