//! Minimal DHCPv4 message codec.
//!
//! Covers the fixed BOOTP header and the handful of options the client and
//! server exchange: message type (53), subnet mask (1), router (3), DNS
//! servers (6), requested address (50), lease time (51), server id (54) and
//! the parameter request list (55). Other options are skipped on decode.

use std::net::Ipv4Addr;

use crate::supplicant::MacAddr;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
const HEADER_LEN: usize = 236;
const OPTIONS_OFFSET: usize = HEADER_LEN + MAGIC_COOKIE.len();
/// BOOTP relays drop anything shorter.
const MIN_PACKET_LEN: usize = 300;

const HTYPE_ETHERNET: u8 = 1;
const FLAG_BROADCAST: u16 = 0x8000;

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAMETER_REQUEST: u8 = 55;
const OPT_END: u8 = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("packet truncated at {0} bytes")]
    Truncated(usize),

    #[error("missing DHCP magic cookie")]
    BadCookie,

    #[error("option {code} has invalid length {len}")]
    BadOption { code: u8, len: usize },

    #[error("unknown op code {0}")]
    BadOp(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    BootRequest = 1,
    BootReply = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => MessageType::Discover,
            2 => MessageType::Offer,
            3 => MessageType::Request,
            4 => MessageType::Decline,
            5 => MessageType::Ack,
            6 => MessageType::Nak,
            7 => MessageType::Release,
            8 => MessageType::Inform,
            _ => return None,
        })
    }
}

/// Options this codec understands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhcpOptions {
    pub message_type: Option<MessageType>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub routers: Vec<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub requested_ip: Option<Ipv4Addr>,
    pub lease_time: Option<u32>,
    pub server_id: Option<Ipv4Addr>,
    pub parameter_request: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    pub op: Op,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: MacAddr,
    pub options: DhcpOptions,
}

impl DhcpPacket {
    /// A client message of `kind` with the broadcast flag set.
    pub fn client(kind: MessageType, xid: u32, mac: MacAddr) -> Self {
        Self {
            op: Op::BootRequest,
            xid,
            secs: 0,
            flags: FLAG_BROADCAST,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: mac,
            options: DhcpOptions {
                message_type: Some(kind),
                parameter_request: vec![OPT_SUBNET_MASK, OPT_ROUTER, OPT_DNS],
                ..DhcpOptions::default()
            },
        }
    }

    /// A server reply of `kind` answering `request`.
    pub fn reply(request: &DhcpPacket, kind: MessageType, server_id: Ipv4Addr) -> Self {
        Self {
            op: Op::BootReply,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: server_id,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            options: DhcpOptions {
                message_type: Some(kind),
                server_id: Some(server_id),
                ..DhcpOptions::default()
            },
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.options.message_type
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MIN_PACKET_LEN);
        buf.push(self.op as u8);
        buf.push(HTYPE_ETHERNET);
        buf.push(6);
        buf.push(0);
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&self.secs.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        for addr in [self.ciaddr, self.yiaddr, self.siaddr, self.giaddr] {
            buf.extend_from_slice(&addr.octets());
        }
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&self.chaddr.0);
        buf.extend_from_slice(&chaddr);
        // sname + file
        buf.resize(HEADER_LEN, 0);
        buf.extend_from_slice(&MAGIC_COOKIE);

        let o = &self.options;
        if let Some(kind) = o.message_type {
            put_option(&mut buf, OPT_MESSAGE_TYPE, &[kind as u8]);
        }
        if let Some(id) = o.server_id {
            put_option(&mut buf, OPT_SERVER_ID, &id.octets());
        }
        if let Some(ip) = o.requested_ip {
            put_option(&mut buf, OPT_REQUESTED_IP, &ip.octets());
        }
        if let Some(secs) = o.lease_time {
            put_option(&mut buf, OPT_LEASE_TIME, &secs.to_be_bytes());
        }
        if let Some(mask) = o.subnet_mask {
            put_option(&mut buf, OPT_SUBNET_MASK, &mask.octets());
        }
        put_addr_list(&mut buf, OPT_ROUTER, &o.routers);
        put_addr_list(&mut buf, OPT_DNS, &o.dns_servers);
        if !o.parameter_request.is_empty() {
            put_option(&mut buf, OPT_PARAMETER_REQUEST, &o.parameter_request);
        }
        buf.push(OPT_END);
        if buf.len() < MIN_PACKET_LEN {
            buf.resize(MIN_PACKET_LEN, OPT_PAD);
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < OPTIONS_OFFSET {
            return Err(PacketError::Truncated(data.len()));
        }
        if data[HEADER_LEN..OPTIONS_OFFSET] != MAGIC_COOKIE {
            return Err(PacketError::BadCookie);
        }
        let op = match data[0] {
            1 => Op::BootRequest,
            2 => Op::BootReply,
            other => return Err(PacketError::BadOp(other)),
        };
        let addr_at = |i: usize| Ipv4Addr::new(data[i], data[i + 1], data[i + 2], data[i + 3]);
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&data[28..34]);

        Ok(Self {
            op,
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: addr_at(12),
            yiaddr: addr_at(16),
            siaddr: addr_at(20),
            giaddr: addr_at(24),
            chaddr: MacAddr(mac),
            options: decode_options(&data[OPTIONS_OFFSET..])?,
        })
    }
}

fn put_option(buf: &mut Vec<u8>, code: u8, value: &[u8]) {
    buf.push(code);
    buf.push(value.len() as u8);
    buf.extend_from_slice(value);
}

fn put_addr_list(buf: &mut Vec<u8>, code: u8, addrs: &[Ipv4Addr]) {
    if addrs.is_empty() {
        return;
    }
    let bytes: Vec<u8> = addrs.iter().flat_map(|a| a.octets()).collect();
    put_option(buf, code, &bytes);
}

fn one_addr(code: u8, value: &[u8]) -> Result<Ipv4Addr, PacketError> {
    let octets: [u8; 4] = value.try_into().map_err(|_| PacketError::BadOption {
        code,
        len: value.len(),
    })?;
    Ok(Ipv4Addr::from(octets))
}

fn addr_list(code: u8, value: &[u8]) -> Result<Vec<Ipv4Addr>, PacketError> {
    if value.is_empty() || value.len() % 4 != 0 {
        return Err(PacketError::BadOption {
            code,
            len: value.len(),
        });
    }
    Ok(value
        .chunks_exact(4)
        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
        .collect())
}

fn decode_options(mut data: &[u8]) -> Result<DhcpOptions, PacketError> {
    let mut opts = DhcpOptions::default();
    while let Some((&code, rest)) = data.split_first() {
        match code {
            OPT_PAD => {
                data = rest;
                continue;
            }
            OPT_END => break,
            _ => {}
        }
        let (&len, rest) = rest.split_first().ok_or(PacketError::BadOption { code, len: 0 })?;
        let len = len as usize;
        if rest.len() < len {
            return Err(PacketError::BadOption { code, len });
        }
        let (value, rest) = rest.split_at(len);
        data = rest;

        match code {
            OPT_MESSAGE_TYPE => {
                opts.message_type = value.first().copied().and_then(MessageType::from_u8);
            }
            OPT_SUBNET_MASK => opts.subnet_mask = Some(one_addr(code, value)?),
            OPT_ROUTER => opts.routers = addr_list(code, value)?,
            OPT_DNS => opts.dns_servers = addr_list(code, value)?,
            OPT_REQUESTED_IP => opts.requested_ip = Some(one_addr(code, value)?),
            OPT_SERVER_ID => opts.server_id = Some(one_addr(code, value)?),
            OPT_LEASE_TIME => {
                let secs: [u8; 4] = value
                    .try_into()
                    .map_err(|_| PacketError::BadOption { code, len })?;
                opts.lease_time = Some(u32::from_be_bytes(secs));
            }
            OPT_PARAMETER_REQUEST => opts.parameter_request = value.to_vec(),
            _ => {}
        }
    }
    Ok(opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);

    #[test]
    fn test_discover_layout() {
        let pkt = DhcpPacket::client(MessageType::Discover, 0xdead_beef, MAC);
        let bytes = pkt.encode();
        assert_eq!(bytes.len(), MIN_PACKET_LEN);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[4..8], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&bytes[10..12], &[0x80, 0x00]);
        assert_eq!(&bytes[28..34], &MAC.0);
        assert_eq!(&bytes[236..240], &MAGIC_COOKIE);
        assert_eq!(&bytes[240..243], &[OPT_MESSAGE_TYPE, 1, 1]);
    }

    #[test]
    fn test_ack_decodes_lease_options() {
        let request = DhcpPacket::client(MessageType::Request, 7, MAC);
        let mut ack = DhcpPacket::reply(&request, MessageType::Ack, Ipv4Addr::new(10, 0, 0, 1));
        ack.yiaddr = Ipv4Addr::new(10, 0, 0, 2);
        ack.options.subnet_mask = Some(Ipv4Addr::new(255, 255, 255, 248));
        ack.options.routers = vec![Ipv4Addr::new(10, 0, 0, 1)];
        ack.options.dns_servers = vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)];
        ack.options.lease_time = Some(3600);

        let decoded = DhcpPacket::decode(&ack.encode()).unwrap();
        assert_eq!(decoded, ack);
    }

    #[test]
    fn test_decode_skips_unknown_options() {
        let mut bytes = DhcpPacket::client(MessageType::Discover, 1, MAC).encode();
        // Replace END with hostname option (12) then END.
        let end = bytes.iter().rposition(|b| *b == OPT_END).unwrap();
        bytes.truncate(end);
        bytes.extend_from_slice(&[12, 3, b'c', b'a', b'm', OPT_END]);
        let decoded = DhcpPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(
            DhcpPacket::decode(&[0u8; 10]),
            Err(PacketError::Truncated(10))
        );

        let mut bytes = DhcpPacket::client(MessageType::Discover, 1, MAC).encode();
        bytes[236] = 0;
        assert_eq!(DhcpPacket::decode(&bytes), Err(PacketError::BadCookie));

        let mut bytes = DhcpPacket::client(MessageType::Discover, 1, MAC).encode();
        bytes.truncate(OPTIONS_OFFSET);
        bytes.extend_from_slice(&[OPT_SERVER_ID, 3, 10, 0, 0]);
        assert!(matches!(
            DhcpPacket::decode(&bytes),
            Err(PacketError::BadOption { code: OPT_SERVER_ID, .. })
        ));
    }
}
