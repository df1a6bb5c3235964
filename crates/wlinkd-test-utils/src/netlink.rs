//! Recording [`AddressConfigurator`] for DHCP tests.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use wlinkd_core::BoxFuture;
use wlinkd_core::netlink::{AddressConfigurator, NetlinkError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfiguratorCall {
    SetAddress {
        ifindex: u32,
        addr: Ipv4Addr,
        prefix_len: u8,
    },
    SetDefaultRoute {
        ifindex: u32,
        gateway: Ipv4Addr,
    },
    ClearAddress {
        ifindex: u32,
    },
}

/// Records every call; optionally fails them all. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RecordingConfigurator {
    calls: Arc<Mutex<Vec<ConfiguratorCall>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ConfiguratorCall> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    pub fn clear_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ConfiguratorCall::ClearAddress { .. }))
            .count()
    }

    /// Make subsequent calls fail (they are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, op: &'static str, call: ConfiguratorCall) -> Result<(), NetlinkError> {
        self.calls.lock().expect("call log poisoned").push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NetlinkError::Request {
                op,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl AddressConfigurator for RecordingConfigurator {
    fn set_address(
        &self,
        ifindex: u32,
        addr: Ipv4Addr,
        prefix_len: u8,
    ) -> BoxFuture<'_, Result<(), NetlinkError>> {
        let result = self.record(
            "set_address",
            ConfiguratorCall::SetAddress {
                ifindex,
                addr,
                prefix_len,
            },
        );
        Box::pin(async move { result })
    }

    fn set_default_route(
        &self,
        ifindex: u32,
        gateway: Ipv4Addr,
    ) -> BoxFuture<'_, Result<(), NetlinkError>> {
        let result = self.record(
            "set_default_route",
            ConfiguratorCall::SetDefaultRoute { ifindex, gateway },
        );
        Box::pin(async move { result })
    }

    fn clear_address(&self, ifindex: u32) -> BoxFuture<'_, Result<(), NetlinkError>> {
        let result = self.record("clear_address", ConfiguratorCall::ClearAddress { ifindex });
        Box::pin(async move { result })
    }
}
