//! Server-side address pool and lease bindings.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use wlinkd_config::DhcpServerConfig;

use crate::supplicant::MacAddr;

/// The immutable address range handed out by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasePool {
    pub server_id: Ipv4Addr,
    pub start: Ipv4Addr,
    pub len: u32,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub lease_time: Duration,
}

impl LeasePool {
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let start = u32::from(self.start);
        let addr = u32::from(addr);
        addr >= start && addr - start < self.len
    }

    /// Pool addresses in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        let start = u32::from(self.start);
        (0..self.len).map(move |i| Ipv4Addr::from(start.wrapping_add(i)))
    }
}

impl From<&DhcpServerConfig> for LeasePool {
    fn from(config: &DhcpServerConfig) -> Self {
        Self {
            server_id: config.server_id,
            start: config.pool_start,
            len: config.pool_len,
            subnet_mask: config.subnet_mask,
            gateway: config.gateway,
            lease_time: Duration::from_secs(u64::from(config.lease_secs)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub addr: Ipv4Addr,
    pub expires_at: Instant,
}

/// Client bindings with a time-ordered expiry index.
///
/// Invariant: `by_client`, `by_addr` and `expiry` describe the same set of
/// bindings.
#[derive(Debug, Default)]
pub struct LeaseTable {
    by_client: HashMap<MacAddr, Binding>,
    by_addr: HashMap<Ipv4Addr, MacAddr>,
    expiry: BTreeSet<(Instant, MacAddr)>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }

    pub fn get(&self, client: &MacAddr) -> Option<&Binding> {
        self.by_client.get(client)
    }

    /// Who holds `addr`, if anyone.
    pub fn holder(&self, addr: Ipv4Addr) -> Option<MacAddr> {
        self.by_addr.get(&addr).copied()
    }

    /// Bind (or rebind) `client` to `addr` until `expires_at`.
    pub fn bind(&mut self, client: MacAddr, addr: Ipv4Addr, expires_at: Instant) {
        self.release(&client);
        self.by_client.insert(client, Binding { addr, expires_at });
        self.by_addr.insert(addr, client);
        self.expiry.insert((expires_at, client));
    }

    /// Drop the binding of `client`, returning its address.
    pub fn release(&mut self, client: &MacAddr) -> Option<Ipv4Addr> {
        let binding = self.by_client.remove(client)?;
        self.by_addr.remove(&binding.addr);
        self.expiry.remove(&(binding.expires_at, *client));
        Some(binding.addr)
    }

    /// Release every binding that expired at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<(MacAddr, Ipv4Addr)> {
        let mut released = Vec::new();
        while let Some(&(at, client)) = self.expiry.first() {
            if at > now {
                break;
            }
            if let Some(addr) = self.release(&client) {
                released.push((client, addr));
            }
        }
        released
    }

    /// First pool address with no binding.
    pub fn first_free(&self, pool: &LeasePool) -> Option<Ipv4Addr> {
        pool.addresses().find(|a| !self.by_addr.contains_key(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pool() -> LeasePool {
        LeasePool::from(&DhcpServerConfig::default())
    }

    const A: MacAddr = MacAddr([2, 0, 0, 0, 0, 0xa]);
    const B: MacAddr = MacAddr([2, 0, 0, 0, 0, 0xb]);

    #[test]
    fn test_default_pool() {
        let pool = pool();
        let addrs: Vec<_> = pool.addresses().collect();
        assert_eq!(addrs.first(), Some(&Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(addrs.last(), Some(&Ipv4Addr::new(10, 0, 0, 6)));
        assert!(pool.contains(Ipv4Addr::new(10, 0, 0, 6)));
        assert!(!pool.contains(Ipv4Addr::new(10, 0, 0, 7)));
        assert!(!pool.contains(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_first_fit() {
        let pool = pool();
        let now = Instant::now();
        let mut table = LeaseTable::new();
        table.bind(A, Ipv4Addr::new(10, 0, 0, 2), now);
        assert_eq!(table.first_free(&pool), Some(Ipv4Addr::new(10, 0, 0, 3)));
        table.release(&A);
        assert_eq!(table.first_free(&pool), Some(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn test_rebind_moves_expiry() {
        let now = Instant::now();
        let mut table = LeaseTable::new();
        table.bind(A, Ipv4Addr::new(10, 0, 0, 2), now + Duration::from_secs(1));
        table.bind(A, Ipv4Addr::new(10, 0, 0, 2), now + Duration::from_secs(100));
        assert!(table.expire(now + Duration::from_secs(10)).is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_expire_in_time_order() {
        let now = Instant::now();
        let mut table = LeaseTable::new();
        table.bind(A, Ipv4Addr::new(10, 0, 0, 2), now + Duration::from_secs(5));
        table.bind(B, Ipv4Addr::new(10, 0, 0, 3), now + Duration::from_secs(1));

        let released = table.expire(now + Duration::from_secs(2));
        assert_eq!(released, vec![(B, Ipv4Addr::new(10, 0, 0, 3))]);
        assert_eq!(table.holder(Ipv4Addr::new(10, 0, 0, 3)), None);
        assert_eq!(table.holder(Ipv4Addr::new(10, 0, 0, 2)), Some(A));
    }
}
