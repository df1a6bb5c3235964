//! Applying DHCP results to the kernel: interface address and default route.

use std::net::{IpAddr, Ipv4Addr};

use futures::TryStreamExt;
use netlink_packet_route::AddressFamily;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use tracing::{debug, info};

use super::NetlinkError;
use crate::BoxFuture;

/// Prefix length of a contiguous netmask (its number of set bits).
pub fn prefix_len(mask: Ipv4Addr) -> u8 {
    u32::from(mask).count_ones() as u8
}

/// Kernel address/route mutations used by the DHCP client.
///
/// Every call reports failure; nothing is silently skipped.
pub trait AddressConfigurator: Send + Sync {
    fn set_address(
        &self,
        ifindex: u32,
        addr: Ipv4Addr,
        prefix_len: u8,
    ) -> BoxFuture<'_, Result<(), NetlinkError>>;

    fn set_default_route(
        &self,
        ifindex: u32,
        gateway: Ipv4Addr,
    ) -> BoxFuture<'_, Result<(), NetlinkError>>;

    /// Remove every IPv4 address from the interface.
    fn clear_address(&self, ifindex: u32) -> BoxFuture<'_, Result<(), NetlinkError>>;
}

/// [`AddressConfigurator`] backed by an rtnetlink connection.
#[derive(Clone)]
pub struct RtNetlinkConfigurator {
    handle: rtnetlink::Handle,
}

impl RtNetlinkConfigurator {
    /// Open a netlink route socket and spawn its connection task.
    pub fn connect() -> Result<Self, NetlinkError> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    async fn ipv4_addresses(&self, ifindex: u32) -> Result<Vec<AddressMessage>, NetlinkError> {
        let mut stream = self
            .handle
            .address()
            .get()
            .set_link_index_filter(ifindex)
            .execute();
        let mut out = Vec::new();
        while let Some(msg) = stream
            .try_next()
            .await
            .map_err(|e| NetlinkError::request("address get", e))?
        {
            if msg.header.family == AddressFamily::Inet {
                out.push(msg);
            }
        }
        Ok(out)
    }
}

fn has_address(msg: &AddressMessage, addr: Ipv4Addr, prefix_len: u8) -> bool {
    msg.header.prefix_len == prefix_len
        && msg
            .attributes
            .iter()
            .any(|a| matches!(a, AddressAttribute::Address(IpAddr::V4(a)) if *a == addr))
}

/// Addresses other than the one just set.
fn stale_addresses(
    present: Vec<AddressMessage>,
    addr: Ipv4Addr,
    prefix_len: u8,
) -> Vec<AddressMessage> {
    present
        .into_iter()
        .filter(|m| !has_address(m, addr, prefix_len))
        .collect()
}

impl AddressConfigurator for RtNetlinkConfigurator {
    fn set_address(
        &self,
        ifindex: u32,
        addr: Ipv4Addr,
        prefix_len: u8,
    ) -> BoxFuture<'_, Result<(), NetlinkError>> {
        Box::pin(async move {
            // Replace so a renewal of the same address is not EEXIST.
            self.handle
                .address()
                .add(ifindex, IpAddr::V4(addr), prefix_len)
                .replace()
                .execute()
                .await
                .map_err(|e| NetlinkError::request("address add", e))?;
            info!(ifindex, %addr, prefix_len, "address set");

            let present = self.ipv4_addresses(ifindex).await?;
            for msg in stale_addresses(present, addr, prefix_len) {
                debug!(ifindex, "removing previous address");
                self.handle
                    .address()
                    .del(msg)
                    .execute()
                    .await
                    .map_err(|e| NetlinkError::request("address del", e))?;
            }
            Ok(())
        })
    }

    fn set_default_route(
        &self,
        ifindex: u32,
        gateway: Ipv4Addr,
    ) -> BoxFuture<'_, Result<(), NetlinkError>> {
        Box::pin(async move {
            self.handle
                .route()
                .add()
                .v4()
                .replace()
                .output_interface(ifindex)
                .gateway(gateway)
                .execute()
                .await
                .map_err(|e| NetlinkError::request("route add", e))?;
            info!(ifindex, %gateway, "default route set");
            Ok(())
        })
    }

    fn clear_address(&self, ifindex: u32) -> BoxFuture<'_, Result<(), NetlinkError>> {
        Box::pin(async move {
            let present = self.ipv4_addresses(ifindex).await?;
            let count = present.len();
            for msg in present {
                self.handle
                    .address()
                    .del(msg)
                    .execute()
                    .await
                    .map_err(|e| NetlinkError::request("address del", e))?;
            }
            info!(ifindex, count, "addresses cleared");
            Ok(())
        })
    }
}
