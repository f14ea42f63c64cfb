use pnet::packet::util::checksum;
use std::sync::atomic::{AtomicU16, Ordering};

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Default payload size (32 bytes, same as the classic Windows ping buffer)
pub const DEFAULT_PAYLOAD_SIZE: usize = 32;
/// Minimum payload size (identifier + sequence backup, 4 bytes timestamp)
pub const MIN_PAYLOAD_SIZE: usize = 8;
/// Largest payload whose IPv4 echo fits a 1500-byte MTU (20 IP + 8 ICMP)
pub const MAX_PAYLOAD_SIZE: usize = 1472;

pub(crate) const ICMP_ECHO_REQUEST: u8 = 8;
pub(crate) const ICMPV6_ECHO_REQUEST: u8 = 128;

static TRANSPORTS: AtomicU16 = AtomicU16::new(0);

/// Get process identifier for ICMP identification field
pub fn get_identifier() -> u16 {
    std::process::id() as u16
}

/// Identifier for a new transport, unique among the process's live transports.
///
/// Raw sockets see every ICMP packet on the host, so two sessions sharing an
/// identifier would accept each other's replies.
pub fn next_identifier() -> u16 {
    get_identifier() ^ TRANSPORTS.fetch_add(1, Ordering::Relaxed)
}

/// Build an ICMP Echo Request packet with configurable payload size
///
/// Set ipv6=true to build an ICMPv6 Echo Request. The ICMPv6 checksum is left
/// at zero because the kernel fills it in for ICMPv6 sockets.
///
/// Payload layout:
/// - Bytes 0-1: identifier (kept in case the kernel rewrites the header id on DGRAM sockets)
/// - Bytes 2-3: sequence
/// - Bytes 4-7: timestamp (lower 32 bits of microseconds since the epoch)
/// - Bytes 8+: pattern fill
pub fn build_echo_request(
    identifier: u16,
    sequence: u16,
    payload_size: usize,
    ipv6: bool,
) -> Vec<u8> {
    let payload_size = payload_size.max(MIN_PAYLOAD_SIZE);
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload_size];

    buffer[0] = if ipv6 {
        ICMPV6_ECHO_REQUEST
    } else {
        ICMP_ECHO_REQUEST
    };
    buffer[1] = 0;
    buffer[4..6].copy_from_slice(&identifier.to_be_bytes());
    buffer[6..8].copy_from_slice(&sequence.to_be_bytes());

    let payload = &mut buffer[ICMP_HEADER_SIZE..];
    payload[0..2].copy_from_slice(&identifier.to_be_bytes());
    payload[2..4].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u32)
        .unwrap_or_default();
    payload[4..8].copy_from_slice(&timestamp.to_be_bytes());

    for (i, byte) in payload[8..].iter_mut().enumerate() {
        *byte = (i & 0xFF) as u8;
    }

    if !ipv6 {
        // skipword 1 covers the checksum field itself
        let cksum = checksum(&buffer, 1);
        buffer[2..4].copy_from_slice(&cksum.to_be_bytes());
    }

    buffer
}
