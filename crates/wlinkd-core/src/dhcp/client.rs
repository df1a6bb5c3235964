//! DHCPv4 client state machine.
//!
//! `Idle → Discovering → Requesting → Configured`, back to `Idle` on
//! [`DhcpClient::stop`]. The machine does no I/O: every input returns the
//! [`Action`]s the caller must perform, and time is passed in explicitly.
//!
//! Each negotiation phase gets `max_attempts` transmissions spaced by the
//! retransmit interval. When they run out the failure is recorded and the
//! machine stays where it is until it is stopped and started again.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::packet::{DhcpPacket, MessageType, Op};
use crate::netlink::prefix_len;
use crate::supplicant::MacAddr;

/// Nameservers kept from an ACK.
pub const MAX_NAMESERVERS: usize = 3;

/// Mask assumed when the server leaves option 1 out.
const FALLBACK_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// Lease time assumed when the server leaves option 51 out.
const FALLBACK_LEASE_SECS: u32 = 3_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    Idle,
    Discovering,
    Requesting,
    Configured,
}

/// An acquired lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub addr: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub nameservers: Vec<Ipv4Addr>,
    pub lease_secs: u32,
    pub server_id: Ipv4Addr,
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Broadcast this packet to the server port.
    Send(DhcpPacket),
    /// Apply an address and, when known, the default route.
    Configure {
        ifindex: u32,
        addr: Ipv4Addr,
        prefix_len: u8,
        gateway: Option<Ipv4Addr>,
    },
    /// Remove the interface addresses.
    ClearAddress { ifindex: u32 },
}

/// JSON shape of the `dhcp4` status section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DhcpClientStatus {
    pub state: ClientState,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<LeaseStatus>,
}

impl Default for DhcpClientStatus {
    fn default() -> Self {
        Self {
            state: ClientState::Idle,
            failed: false,
            lease: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseStatus {
    pub ip: Ipv4Addr,
    pub subnetmask: Ipv4Addr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaultgw: Option<Ipv4Addr>,
    pub nameservers: Vec<Ipv4Addr>,
}

/// A fresh random transaction id.
fn fresh_xid() -> u32 {
    rand::random()
}

#[derive(Debug)]
pub struct DhcpClient {
    state: ClientState,
    ifindex: u32,
    mac: MacAddr,
    xid: u32,
    /// Last packet sent in the current phase, kept for retransmission.
    outstanding: Option<DhcpPacket>,
    attempts: u32,
    max_attempts: u32,
    retransmit: Duration,
    deadline: Option<Instant>,
    failed: bool,
    lease: Option<Lease>,
}

impl DhcpClient {
    pub fn new(max_attempts: u32, retransmit: Duration) -> Self {
        Self {
            state: ClientState::Idle,
            ifindex: 0,
            mac: MacAddr::default(),
            xid: 0,
            outstanding: None,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            retransmit,
            deadline: None,
            failed: false,
            lease: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// When [`handle_timeout`](Self::handle_timeout) next has work to do.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Begin acquiring a lease on `ifindex`. Ignored unless idle.
    pub fn start(&mut self, ifindex: u32, ifname: &str, mac: MacAddr, now: Instant) -> Vec<Action> {
        if self.state != ClientState::Idle {
            debug!(state = ?self.state, "DHCP client already running");
            return Vec::new();
        }
        info!(ifname, ifindex, %mac, "DHCP client starting");
        self.ifindex = ifindex;
        self.mac = mac;
        self.discover(now)
    }

    /// Give up the lease and go idle. Clears the interface address once
    /// per non-idle period; calling it again while idle does nothing.
    pub fn stop(&mut self) -> Vec<Action> {
        if self.state == ClientState::Idle {
            return Vec::new();
        }
        info!(state = ?self.state, "DHCP client stopping");
        self.state = ClientState::Idle;
        self.lease = None;
        self.outstanding = None;
        self.deadline = None;
        self.failed = false;
        vec![Action::ClearAddress {
            ifindex: self.ifindex,
        }]
    }

    /// The address could not be applied; shows up as `failed` in status.
    pub fn report_failure(&mut self) {
        self.failed = true;
    }

    /// Feed one received packet.
    pub fn handle_packet(&mut self, pkt: &DhcpPacket, now: Instant) -> Vec<Action> {
        if pkt.op != Op::BootReply || pkt.xid != self.xid || pkt.chaddr != self.mac {
            return Vec::new();
        }
        match (self.state, pkt.message_type()) {
            (ClientState::Discovering, Some(MessageType::Offer)) => {
                let Some(server_id) = pkt.options.server_id.or(nonzero(pkt.siaddr)) else {
                    debug!("OFFER without server id ignored");
                    return Vec::new();
                };
                debug!(offered = %pkt.yiaddr, %server_id, "DHCP offer");
                self.request(pkt.yiaddr, server_id, now)
            }
            (ClientState::Requesting, Some(MessageType::Ack)) => self.configure(pkt, now),
            (ClientState::Requesting, Some(MessageType::Nak)) => {
                warn!("DHCP request refused, rediscovering");
                let mut actions = self.drop_applied_lease();
                actions.extend(self.discover(now));
                actions
            }
            _ => Vec::new(),
        }
    }

    /// Retransmit or renew once the deadline has passed.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<Action> {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return Vec::new(),
        }
        match self.state {
            ClientState::Idle => Vec::new(),
            ClientState::Configured => match self.lease.clone() {
                Some(lease) => {
                    debug!(addr = %lease.addr, "renewing lease");
                    self.request(lease.addr, lease.server_id, now)
                }
                None => Vec::new(),
            },
            ClientState::Discovering | ClientState::Requesting => {
                if self.attempts >= self.max_attempts {
                    warn!(
                        state = ?self.state,
                        attempts = self.attempts,
                        "DHCP negotiation gave up"
                    );
                    self.failed = true;
                    self.deadline = None;
                    // A renewal that got no answer leaves nothing usable.
                    return self.drop_applied_lease();
                }
                self.attempts += 1;
                self.deadline = Some(now + self.retransmit);
                self.outstanding.clone().map(Action::Send).into_iter().collect()
            }
        }
    }

    pub fn dump_status(&self) -> DhcpClientStatus {
        DhcpClientStatus {
            state: self.state,
            failed: self.failed,
            lease: self.lease.as_ref().map(|l| LeaseStatus {
                ip: l.addr,
                subnetmask: l.subnet_mask,
                defaultgw: l.gateway,
                nameservers: l.nameservers.clone(),
            }),
        }
    }

    /// Forget the current lease, clearing the interface if one was applied.
    fn drop_applied_lease(&mut self) -> Vec<Action> {
        match self.lease.take() {
            Some(lease) => {
                info!(addr = %lease.addr, "dropping lease");
                vec![Action::ClearAddress {
                    ifindex: self.ifindex,
                }]
            }
            None => Vec::new(),
        }
    }

    fn begin_phase(&mut self, state: ClientState, pkt: DhcpPacket, now: Instant) -> Vec<Action> {
        self.state = state;
        self.attempts = 1;
        self.failed = false;
        self.deadline = Some(now + self.retransmit);
        self.outstanding = Some(pkt.clone());
        vec![Action::Send(pkt)]
    }

    fn discover(&mut self, now: Instant) -> Vec<Action> {
        self.xid = fresh_xid();
        let pkt = DhcpPacket::client(MessageType::Discover, self.xid, self.mac);
        self.begin_phase(ClientState::Discovering, pkt, now)
    }

    fn request(&mut self, addr: Ipv4Addr, server_id: Ipv4Addr, now: Instant) -> Vec<Action> {
        self.xid = fresh_xid();
        let mut pkt = DhcpPacket::client(MessageType::Request, self.xid, self.mac);
        pkt.options.requested_ip = Some(addr);
        pkt.options.server_id = Some(server_id);
        self.begin_phase(ClientState::Requesting, pkt, now)
    }

    fn configure(&mut self, ack: &DhcpPacket, now: Instant) -> Vec<Action> {
        let subnet_mask = ack.options.subnet_mask.unwrap_or_else(|| {
            warn!("ACK without subnet mask, assuming {FALLBACK_MASK}");
            FALLBACK_MASK
        });
        let lease_secs = ack.options.lease_time.unwrap_or(FALLBACK_LEASE_SECS);
        let lease = Lease {
            addr: ack.yiaddr,
            subnet_mask,
            gateway: ack.options.routers.first().copied(),
            nameservers: ack
                .options
                .dns_servers
                .iter()
                .take(MAX_NAMESERVERS)
                .copied()
                .collect(),
            lease_secs,
            server_id: ack
                .options
                .server_id
                .or(nonzero(ack.siaddr))
                .unwrap_or(Ipv4Addr::UNSPECIFIED),
        };
        info!(
            addr = %lease.addr,
            mask = %lease.subnet_mask,
            gateway = ?lease.gateway,
            lease_secs,
            "DHCP lease acquired"
        );

        let action = Action::Configure {
            ifindex: self.ifindex,
            addr: lease.addr,
            prefix_len: prefix_len(lease.subnet_mask),
            gateway: lease.gateway,
        };
        self.state = ClientState::Configured;
        self.outstanding = None;
        self.attempts = 0;
        // Renew at half the lease time.
        self.deadline = Some(now + Duration::from_secs(u64::from(lease_secs / 2).max(1)));
        self.lease = Some(lease);
        vec![action]
    }
}

fn nonzero(addr: Ipv4Addr) -> Option<Ipv4Addr> {
    (!addr.is_unspecified()).then_some(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x07]);
    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const OFFERED: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn sent(actions: &[Action]) -> &DhcpPacket {
        match actions {
            [Action::Send(pkt)] => pkt,
            other => panic!("expected one Send, got {other:?}"),
        }
    }

    fn server_reply(client: &DhcpClient, kind: MessageType) -> DhcpPacket {
        let req = DhcpPacket::client(MessageType::Request, client.xid(), MAC);
        let mut reply = DhcpPacket::reply(&req, kind, SERVER);
        reply.yiaddr = OFFERED;
        reply.options.subnet_mask = Some(Ipv4Addr::new(255, 255, 255, 248));
        reply.options.routers = vec![SERVER];
        reply.options.dns_servers = vec![
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(1, 0, 0, 1),
            Ipv4Addr::new(8, 8, 8, 8),
            Ipv4Addr::new(8, 8, 4, 4),
        ];
        reply.options.lease_time = Some(600);
        reply
    }

    fn configured_client(now: Instant) -> DhcpClient {
        let mut client = DhcpClient::new(4, Duration::from_secs(3));
        client.start(5, "wlan0", MAC, now);
        let offer = server_reply(&client, MessageType::Offer);
        client.handle_packet(&offer, now);
        let ack = server_reply(&client, MessageType::Ack);
        client.handle_packet(&ack, now);
        assert_eq!(client.state(), ClientState::Configured);
        client
    }

    #[test]
    fn test_full_negotiation() {
        let now = Instant::now();
        let mut client = DhcpClient::new(4, Duration::from_secs(3));

        let actions = client.start(5, "wlan0", MAC, now);
        let discover = sent(&actions);
        assert_eq!(discover.message_type(), Some(MessageType::Discover));
        assert_eq!(discover.xid, client.xid());
        assert_eq!(client.state(), ClientState::Discovering);

        let discover_xid = client.xid();
        let offer = server_reply(&client, MessageType::Offer);
        let actions = client.handle_packet(&offer, now);
        let request = sent(&actions);
        assert_eq!(request.message_type(), Some(MessageType::Request));
        assert_eq!(request.options.requested_ip, Some(OFFERED));
        assert_eq!(request.options.server_id, Some(SERVER));
        assert_eq!(client.state(), ClientState::Requesting);
        assert_ne!(client.xid(), discover_xid);

        let ack = server_reply(&client, MessageType::Ack);
        let actions = client.handle_packet(&ack, now);
        assert_eq!(
            actions,
            vec![Action::Configure {
                ifindex: 5,
                addr: OFFERED,
                prefix_len: 29,
                gateway: Some(SERVER),
            }]
        );
        let lease = client.lease().unwrap();
        assert_eq!(lease.nameservers.len(), MAX_NAMESERVERS);
        assert_eq!(lease.lease_secs, 600);
    }

    #[test]
    fn test_mismatched_xid_is_ignored() {
        let now = Instant::now();
        let mut client = DhcpClient::new(4, Duration::from_secs(3));
        client.start(5, "wlan0", MAC, now);
        let mut offer = server_reply(&client, MessageType::Offer);
        offer.xid = offer.xid.wrapping_add(1);
        assert!(client.handle_packet(&offer, now).is_empty());
        assert_eq!(client.state(), ClientState::Discovering);
    }

    #[test]
    fn test_nak_restarts_discovery() {
        let now = Instant::now();
        let mut client = DhcpClient::new(4, Duration::from_secs(3));
        client.start(5, "wlan0", MAC, now);
        let offer = server_reply(&client, MessageType::Offer);
        client.handle_packet(&offer, now);

        let nak = server_reply(&client, MessageType::Nak);
        let actions = client.handle_packet(&nak, now);
        assert_eq!(sent(&actions).message_type(), Some(MessageType::Discover));
        assert_eq!(client.state(), ClientState::Discovering);
    }

    #[test]
    fn test_retry_budget() {
        let t0 = Instant::now();
        let step = Duration::from_secs(3);
        let mut client = DhcpClient::new(4, step);
        client.start(5, "wlan0", MAC, t0);

        // Not yet due.
        assert!(client.handle_timeout(t0 + Duration::from_secs(1)).is_empty());

        let mut now = t0;
        for _ in 0..3 {
            now += step;
            let actions = client.handle_timeout(now);
            assert_eq!(sent(&actions).message_type(), Some(MessageType::Discover));
        }
        now += step;
        assert!(client.handle_timeout(now).is_empty());
        assert!(client.failed());
        assert_eq!(client.state(), ClientState::Discovering);
        assert_eq!(client.deadline(), None);
    }

    #[test]
    fn test_stop_clears_once() {
        let now = Instant::now();
        let mut client = configured_client(now);

        assert_eq!(client.stop(), vec![Action::ClearAddress { ifindex: 5 }]);
        assert_eq!(client.state(), ClientState::Idle);
        assert!(client.lease().is_none());
        assert!(client.stop().is_empty());
        assert!(client.stop().is_empty());
    }

    #[test]
    fn test_stop_from_idle_is_noop() {
        let mut client = DhcpClient::new(4, Duration::from_secs(3));
        assert!(client.stop().is_empty());
    }

    #[test]
    fn test_renewal_requests_same_address() {
        let now = Instant::now();
        let mut client = configured_client(now);
        let deadline = client.deadline().unwrap();

        let actions = client.handle_timeout(deadline);
        let request = sent(&actions);
        assert_eq!(request.options.requested_ip, Some(OFFERED));
        assert_eq!(client.state(), ClientState::Requesting);

        let ack = server_reply(&client, MessageType::Ack);
        let actions = client.handle_packet(&ack, deadline);
        assert!(matches!(actions.as_slice(), [Action::Configure { .. }]));
    }

    #[test]
    fn test_nak_on_renewal_clears_old_address() {
        let now = Instant::now();
        let mut client = configured_client(now);
        let deadline = client.deadline().unwrap();
        client.handle_timeout(deadline);
        assert_eq!(client.state(), ClientState::Requesting);

        let nak = server_reply(&client, MessageType::Nak);
        let actions = client.handle_packet(&nak, deadline);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0], Action::ClearAddress { ifindex: 5 });
        assert!(
            matches!(&actions[1], Action::Send(pkt) if pkt.message_type() == Some(MessageType::Discover))
        );
        assert!(client.lease().is_none());
        assert!(client.dump_status().lease.is_none());

        // A NAK without an applied lease clears nothing.
        let offer = server_reply(&client, MessageType::Offer);
        client.handle_packet(&offer, deadline);
        let nak = server_reply(&client, MessageType::Nak);
        let actions = client.handle_packet(&nak, deadline);
        assert_eq!(sent(&actions).message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn test_renewal_give_up_clears_address() {
        let now = Instant::now();
        let mut client = configured_client(now);
        let mut at = client.deadline().unwrap();
        client.handle_timeout(at);

        for _ in 0..3 {
            at += Duration::from_secs(3);
            let actions = client.handle_timeout(at);
            assert_eq!(sent(&actions).message_type(), Some(MessageType::Request));
        }
        at += Duration::from_secs(3);
        assert_eq!(
            client.handle_timeout(at),
            vec![Action::ClearAddress { ifindex: 5 }]
        );
        assert!(client.failed());
        assert!(client.lease().is_none());

        // Stopping afterwards still clears once for the non-idle period.
        assert_eq!(client.stop(), vec![Action::ClearAddress { ifindex: 5 }]);
    }

    #[test]
    fn test_status_json() {
        let client = configured_client(Instant::now());
        let json = serde_json::to_value(client.dump_status()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "state": "configured",
                "lease": {
                    "ip": "10.0.0.2",
                    "subnetmask": "255.255.255.248",
                    "defaultgw": "10.0.0.1",
                    "nameservers": ["1.1.1.1", "1.0.0.1", "8.8.8.8"],
                }
            })
        );

        let idle = DhcpClient::new(4, Duration::from_secs(3));
        assert_eq!(
            serde_json::to_value(idle.dump_status()).unwrap(),
            serde_json::json!({"state": "idle"})
        );
    }
}
