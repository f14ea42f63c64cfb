use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use std::net::IpAddr;

use super::icmp::{ICMP_ECHO_REQUEST, ICMP_HEADER_SIZE, ICMPV6_ECHO_REQUEST};

// ICMPv6 type codes
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_ECHO_REPLY: u8 = 129;

const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

/// What kind of ICMP message answered our echo request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Destination answered
    EchoReply,
    /// TTL expired in transit (code)
    TimeExceeded(u8),
    /// Destination unreachable (code)
    Unreachable(u8),
}

/// ICMP response correlated to one of our echo requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub responder: IpAddr,
    pub kind: ReplyKind,
    pub sequence: u16,
    /// TTL from the reply's IP header (RAW IPv4 only)
    pub ttl: Option<u8>,
    /// Echo payload length (Echo Reply only)
    pub payload_len: usize,
}

/// Validate an ICMP checksum (RFC 1071)
/// Returns true if the one's complement sum folds to 0xFFFF (or 0x0000)
fn validate_icmp_checksum(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }

    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum == 0xFFFF || sum == 0x0000
}

/// Read identifier and sequence from the echo payload backup (bytes 0-3)
fn extract_id_from_payload(payload: &[u8], our_identifier: u16) -> Option<u16> {
    if payload.len() < 4 {
        return None;
    }
    let payload_id = u16::from_be_bytes([payload[0], payload[1]]);
    (payload_id == our_identifier).then(|| u16::from_be_bytes([payload[2], payload[3]]))
}

/// Match an echo header (request or reply) against our identifier.
///
/// DGRAM sockets let the kernel rewrite the header identifier, so the
/// payload backup is consulted when the header does not match.
fn match_echo(icmp_data: &[u8], our_identifier: u16) -> Option<u16> {
    if icmp_data.len() < ICMP_HEADER_SIZE {
        return None;
    }
    let identifier = u16::from_be_bytes([icmp_data[4], icmp_data[5]]);
    let sequence = u16::from_be_bytes([icmp_data[6], icmp_data[7]]);
    if identifier == our_identifier {
        return Some(sequence);
    }
    extract_id_from_payload(&icmp_data[ICMP_HEADER_SIZE..], our_identifier)
}

/// Parse an ICMP response and correlate it to one of our echo requests
///
/// RAW IPv4 sockets deliver the IP header; DGRAM sockets and all ICMPv6
/// sockets deliver the ICMP message directly.
///
/// Returns None if the packet is malformed, not addressed to us, or an
/// Echo Reply with a bad checksum.
pub fn parse_icmp_response(
    data: &[u8],
    responder: IpAddr,
    our_identifier: u16,
    is_dgram: bool,
) -> Option<ParsedReply> {
    if data.is_empty() {
        return None;
    }

    match responder {
        IpAddr::V6(_) => parse_icmpv6(data, responder, our_identifier),
        IpAddr::V4(_) if is_dgram => parse_icmpv4(data, responder, our_identifier, None),
        IpAddr::V4(_) => {
            let ip_packet = Ipv4Packet::new(data)?;
            if ip_packet.get_version() != 4 {
                return None;
            }
            let header_len = (ip_packet.get_header_length() as usize) * 4;
            if header_len < IPV4_MIN_HEADER || data.len() < header_len + ICMP_HEADER_SIZE {
                return None;
            }
            parse_icmpv4(
                &data[header_len..],
                responder,
                our_identifier,
                Some(ip_packet.get_ttl()),
            )
        }
    }
}

fn parse_icmpv4(
    icmp_data: &[u8],
    responder: IpAddr,
    our_identifier: u16,
    ttl: Option<u8>,
) -> Option<ParsedReply> {
    let icmp_packet = IcmpPacket::new(icmp_data)?;
    let code = icmp_packet.get_icmp_code().0;

    let (kind, sequence) = match icmp_packet.get_icmp_type() {
        IcmpTypes::EchoReply => {
            if !validate_icmp_checksum(icmp_data) {
                return None;
            }
            (ReplyKind::EchoReply, match_echo(icmp_data, our_identifier)?)
        }
        IcmpTypes::TimeExceeded => (
            ReplyKind::TimeExceeded(code),
            quoted_sequence_v4(icmp_data, our_identifier)?,
        ),
        IcmpTypes::DestinationUnreachable => (
            ReplyKind::Unreachable(code),
            quoted_sequence_v4(icmp_data, our_identifier)?,
        ),
        _ => return None,
    };

    let payload_len = match kind {
        ReplyKind::EchoReply => icmp_data.len() - ICMP_HEADER_SIZE,
        _ => 0,
    };

    Some(ParsedReply {
        responder,
        kind,
        sequence,
        ttl,
        payload_len,
    })
}

/// Pull our sequence out of the original datagram quoted in an ICMPv4 error
fn quoted_sequence_v4(icmp_data: &[u8], our_identifier: u16) -> Option<u16> {
    let quoted = icmp_data.get(ICMP_HEADER_SIZE..)?;
    let original_ip = Ipv4Packet::new(quoted)?;
    let header_len = (original_ip.get_header_length() as usize) * 4;
    if header_len < IPV4_MIN_HEADER {
        return None;
    }
    let original_icmp = quoted.get(header_len..)?;
    if original_icmp.first() != Some(&ICMP_ECHO_REQUEST) {
        return None;
    }
    match_echo(original_icmp, our_identifier)
}

fn parse_icmpv6(icmp_data: &[u8], responder: IpAddr, our_identifier: u16) -> Option<ParsedReply> {
    if icmp_data.len() < ICMP_HEADER_SIZE {
        return None;
    }
    let code = icmp_data[1];

    let (kind, sequence) = match icmp_data[0] {
        ICMPV6_ECHO_REPLY => (ReplyKind::EchoReply, match_echo(icmp_data, our_identifier)?),
        ICMPV6_TIME_EXCEEDED => (
            ReplyKind::TimeExceeded(code),
            quoted_sequence_v6(icmp_data, our_identifier)?,
        ),
        ICMPV6_DEST_UNREACHABLE => (
            ReplyKind::Unreachable(code),
            quoted_sequence_v6(icmp_data, our_identifier)?,
        ),
        _ => return None,
    };

    let payload_len = match kind {
        ReplyKind::EchoReply => icmp_data.len() - ICMP_HEADER_SIZE,
        _ => 0,
    };

    Some(ParsedReply {
        responder,
        kind,
        sequence,
        ttl: None,
        payload_len,
    })
}

/// ICMPv6 errors quote the fixed 40-byte IPv6 header followed by our echo request
fn quoted_sequence_v6(icmp_data: &[u8], our_identifier: u16) -> Option<u16> {
    let original_icmp = icmp_data.get(ICMP_HEADER_SIZE + IPV6_HEADER_LEN..)?;
    if original_icmp.first() != Some(&ICMPV6_ECHO_REQUEST) {
        return None;
    }
    match_echo(original_icmp, our_identifier)
}
