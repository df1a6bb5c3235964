//! DHCPv4 server state machine for access-point mode.
//!
//! DISCOVER gets an OFFER, REQUEST gets an ACK or a NAK, RELEASE frees the
//! binding. Addresses come first-fit from an immutable [`LeasePool`]; a
//! client that already holds a binding gets the same address back.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::lease::{LeasePool, LeaseTable};
use super::packet::{DhcpPacket, MessageType, Op};

/// How long an offered address stays reserved without a REQUEST.
pub const OFFER_HOLD: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct DhcpServer {
    pool: LeasePool,
    table: LeaseTable,
}

impl DhcpServer {
    pub fn new(pool: LeasePool) -> Self {
        Self {
            pool,
            table: LeaseTable::new(),
        }
    }

    pub fn pool(&self) -> &LeasePool {
        &self.pool
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.table
    }

    /// Answer one client message, if it warrants an answer.
    pub fn handle_packet(&mut self, pkt: &DhcpPacket, now: Instant) -> Option<DhcpPacket> {
        if pkt.op != Op::BootRequest {
            return None;
        }
        for (client, addr) in self.table.expire(now) {
            debug!(%client, %addr, "lease expired");
        }

        match pkt.message_type()? {
            MessageType::Discover => self.offer(pkt, now),
            MessageType::Request => self.acknowledge(pkt, now),
            MessageType::Release | MessageType::Decline => {
                if let Some(addr) = self.table.release(&pkt.chaddr) {
                    info!(client = %pkt.chaddr, %addr, "lease released");
                }
                None
            }
            _ => None,
        }
    }

    fn offer(&mut self, pkt: &DhcpPacket, now: Instant) -> Option<DhcpPacket> {
        // A granted lease keeps its expiry; a fresh offer is only held briefly.
        let hold = now + OFFER_HOLD;
        let (addr, expires_at) = match self.table.get(&pkt.chaddr) {
            Some(binding) => (binding.addr, binding.expires_at.max(hold)),
            None => {
                let Some(addr) = self.table.first_free(&self.pool) else {
                    warn!(client = %pkt.chaddr, "address pool exhausted");
                    return None;
                };
                (addr, hold)
            }
        };
        self.table.bind(pkt.chaddr, addr, expires_at);
        debug!(client = %pkt.chaddr, %addr, "offering");
        Some(self.reply(pkt, MessageType::Offer, addr))
    }

    fn acknowledge(&mut self, pkt: &DhcpPacket, now: Instant) -> Option<DhcpPacket> {
        if let Some(id) = pkt.options.server_id {
            if id != self.pool.server_id {
                // The client picked another server's offer.
                self.table.release(&pkt.chaddr);
                return None;
            }
        }
        let requested = pkt
            .options
            .requested_ip
            .or((!pkt.ciaddr.is_unspecified()).then_some(pkt.ciaddr));

        let granted = match (requested, self.table.get(&pkt.chaddr)) {
            (Some(req), Some(binding)) if req == binding.addr => Some(req),
            (Some(req), None) if self.pool.contains(req) && self.table.holder(req).is_none() => {
                Some(req)
            }
            _ => None,
        };

        match granted {
            Some(addr) => {
                self.table
                    .bind(pkt.chaddr, addr, now + self.pool.lease_time);
                info!(client = %pkt.chaddr, %addr, "lease granted");
                Some(self.reply(pkt, MessageType::Ack, addr))
            }
            None => {
                info!(client = %pkt.chaddr, requested = ?requested, "request refused");
                let mut nak = DhcpPacket::reply(pkt, MessageType::Nak, self.pool.server_id);
                nak.siaddr = Ipv4Addr::UNSPECIFIED;
                Some(nak)
            }
        }
    }

    fn reply(&self, pkt: &DhcpPacket, kind: MessageType, addr: Ipv4Addr) -> DhcpPacket {
        let mut reply = DhcpPacket::reply(pkt, kind, self.pool.server_id);
        reply.yiaddr = addr;
        reply.options.subnet_mask = Some(self.pool.subnet_mask);
        reply.options.routers = vec![self.pool.gateway];
        reply.options.lease_time = Some(self.pool.lease_time.as_secs().min(u64::from(u32::MAX)) as u32);
        reply
    }
}
