//! Kernel interface queries over netlink.
//!
//! - [`resolve_physical_index`]: nl80211 interface dump, mapping an
//!   interface name to its wiphy index.
//! - [`lookup_link`]: rtnetlink link query for the interface index and MAC.
//!
//! Each call opens its own netlink connection and drops it when done.

pub mod address;

use futures::TryStreamExt;
use netlink_packet_route::link::LinkAttribute;
use tracing::debug;
use wl_nl80211::Nl80211Attr;

use crate::supplicant::MacAddr;

pub use address::{AddressConfigurator, RtNetlinkConfigurator, prefix_len};

/// Failure to map an interface name to its wireless PHY.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no wireless interface named {0}")]
    NotFound(String),

    #[error("nl80211 not available: {0}")]
    NotAvailable(String),
}

/// Failure of an rtnetlink request.
#[derive(Debug, thiserror::Error)]
pub enum NetlinkError {
    #[error("netlink connection failed: {0}")]
    Connection(#[from] std::io::Error),

    #[error("no link named {0}")]
    LinkNotFound(String),

    #[error("netlink request {op} failed: {reason}")]
    Request { op: &'static str, reason: String },
}

impl NetlinkError {
    pub(crate) fn request(op: &'static str, err: impl std::fmt::Display) -> Self {
        NetlinkError::Request {
            op,
            reason: err.to_string(),
        }
    }
}

/// Index and hardware address of a network link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    pub index: u32,
    pub mac: MacAddr,
}

/// Wiphy index of the wireless interface called `ifname`.
pub async fn resolve_physical_index(ifname: &str) -> Result<u32, ResolveError> {
    let (connection, handle, _) =
        wl_nl80211::new_connection().map_err(|e| ResolveError::NotAvailable(e.to_string()))?;
    let conn_task = tokio::spawn(connection);

    let result = async {
        let mut dump = handle.interface().get(Vec::new()).execute().await;
        while let Some(msg) = dump
            .try_next()
            .await
            .map_err(|e| ResolveError::NotAvailable(e.to_string()))?
        {
            if let Some(phy) = wiphy_for(&msg.payload.attributes, ifname) {
                return Ok(phy);
            }
        }
        Err(ResolveError::NotFound(ifname.to_string()))
    }
    .await;

    conn_task.abort();
    if let Ok(phy) = &result {
        debug!(ifname, phy, "resolved wiphy");
    }
    result
}

/// The `Wiphy` attribute of a record whose `IfName` is `ifname`.
fn wiphy_for(attrs: &[Nl80211Attr], ifname: &str) -> Option<u32> {
    let name_matches = attrs
        .iter()
        .any(|a| matches!(a, Nl80211Attr::IfName(name) if name == ifname));
    if !name_matches {
        return None;
    }
    attrs.iter().find_map(|a| match a {
        Nl80211Attr::Wiphy(phy) => Some(*phy),
        _ => None,
    })
}

/// Look up the link index and MAC address of `ifname`.
pub async fn lookup_link(ifname: &str) -> Result<LinkInfo, NetlinkError> {
    let (connection, handle, _) = rtnetlink::new_connection()?;
    let conn_task = tokio::spawn(connection);

    let result = async {
        let mut links = handle.link().get().match_name(ifname.to_string()).execute();
        let msg = links
            .try_next()
            .await
            .map_err(|e| match e {
                // The kernel answers ENODEV for unknown names.
                rtnetlink::Error::NetlinkError(_) => NetlinkError::LinkNotFound(ifname.to_string()),
                other => NetlinkError::request("link get", other),
            })?
            .ok_or_else(|| NetlinkError::LinkNotFound(ifname.to_string()))?;

        let mac = msg
            .attributes
            .iter()
            .find_map(|a| match a {
                LinkAttribute::Address(bytes) => <[u8; 6]>::try_from(bytes.as_slice()).ok(),
                _ => None,
            })
            .map(MacAddr)
            .unwrap_or_default();

        Ok(LinkInfo {
            index: msg.header.index,
            mac,
        })
    }
    .await;

    conn_task.abort();
    result
}
