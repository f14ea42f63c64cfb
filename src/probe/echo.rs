use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use super::correlate::{ReplyKind, parse_icmp_response};
use super::icmp::{build_echo_request, next_identifier};
use super::socket::{create_echo_socket, set_dont_fragment, set_ttl};

/// Result of a single echo request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoOutcome {
    /// Destination answered
    Reply {
        from: IpAddr,
        rtt: Duration,
        bytes: usize,
        ttl: Option<u8>,
    },
    /// A router on the way dropped the packet (TTL expired)
    TimeExceeded { from: IpAddr, rtt: Duration },
    /// Destination or network unreachable (ICMP code)
    Unreachable {
        from: IpAddr,
        code: u8,
        rtt: Duration,
    },
    /// Nothing came back before the deadline
    TimedOut,
}

/// Anything that can send one echo request and wait for its answer.
///
/// Implementations do not handle cancellation; callers race the returned
/// future against their cancellation signal and drop it to abort.
#[async_trait]
pub trait EchoTransport: Send {
    async fn echo(
        &mut self,
        target: IpAddr,
        ttl: Option<u8>,
        timeout: Duration,
    ) -> Result<EchoOutcome>;

    /// Acquire whatever is needed to reach `target` before the first echo
    async fn prepare(&mut self, _target: IpAddr) -> Result<()> {
        Ok(())
    }
}

struct EchoSocket {
    socket: UdpSocket,
    is_dgram: bool,
}

/// ICMP echo over RAW or unprivileged DGRAM sockets
///
/// Sockets are opened on first use, one per address family.
pub struct IcmpTransport {
    v4: Option<EchoSocket>,
    v6: Option<EchoSocket>,
    identifier: u16,
    sequence: u16,
    payload_size: usize,
    dont_fragment: bool,
}

impl IcmpTransport {
    pub fn new(payload_size: usize) -> Self {
        Self {
            v4: None,
            v6: None,
            identifier: next_identifier(),
            sequence: 0,
            payload_size,
            dont_fragment: false,
        }
    }

    /// Set the don't-fragment bit on every echo request
    pub fn with_dont_fragment(mut self, enabled: bool) -> Self {
        self.dont_fragment = enabled;
        self
    }

    fn socket(&mut self, ipv6: bool) -> Result<&EchoSocket> {
        let slot = if ipv6 { &mut self.v6 } else { &mut self.v4 };
        if slot.is_none() {
            let info = create_echo_socket(ipv6)?;
            if self.dont_fragment
                && let Err(e) = set_dont_fragment(&info.socket, ipv6)
            {
                tracing::warn!("Could not set don't-fragment: {e}");
            }
            let std_socket: std::net::UdpSocket = info.socket.into();
            let socket = UdpSocket::from_std(std_socket)
                .context("Failed to register ICMP socket with the runtime")?;
            *slot = Some(EchoSocket {
                socket,
                is_dgram: info.is_dgram,
            });
        }
        slot.as_ref()
            .ok_or_else(|| anyhow::anyhow!("ICMP socket unavailable"))
    }

    fn next_sequence(&mut self) -> u16 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }
}

#[async_trait]
impl EchoTransport for IcmpTransport {
    async fn prepare(&mut self, target: IpAddr) -> Result<()> {
        self.socket(target.is_ipv6()).map(|_| ())
    }

    async fn echo(
        &mut self,
        target: IpAddr,
        ttl: Option<u8>,
        timeout: Duration,
    ) -> Result<EchoOutcome> {
        let ipv6 = target.is_ipv6();
        let sequence = self.next_sequence();
        let identifier = self.identifier;
        let packet = build_echo_request(identifier, sequence, self.payload_size, ipv6);
        let sock = self.socket(ipv6)?;

        if let Some(ttl) = ttl {
            set_ttl(socket2::SockRef::from(&sock.socket), ttl, ipv6)?;
        }

        let sent_at = Instant::now();
        sock.socket
            .send_to(&packet, SocketAddr::new(target, 0))
            .await
            .with_context(|| format!("Failed to send echo request to {target}"))?;

        let deadline = tokio::time::Instant::from_std(sent_at + timeout);
        // Room for IPv4 options on top of a full-MTU reply
        let mut buffer = [0u8; 2048];

        loop {
            let (len, from) =
                match tokio::time::timeout_at(deadline, sock.socket.recv_from(&mut buffer)).await {
                    Err(_) => return Ok(EchoOutcome::TimedOut),
                    Ok(received) => received.context("Failed to receive ICMP packet")?,
                };

            let Some(reply) = parse_icmp_response(&buffer[..len], from.ip(), identifier, sock.is_dgram)
            else {
                continue;
            };
            // Replies to earlier, already timed-out requests are stale
            if reply.sequence != sequence {
                tracing::trace!(got = reply.sequence, want = sequence, "stale ICMP reply");
                continue;
            }
            // Echo replies from anyone but the target belong to someone else's ping
            if reply.kind == ReplyKind::EchoReply && reply.responder != target {
                continue;
            }

            let rtt = sent_at.elapsed();
            return Ok(match reply.kind {
                ReplyKind::EchoReply => EchoOutcome::Reply {
                    from: reply.responder,
                    rtt,
                    bytes: reply.payload_len,
                    ttl: reply.ttl,
                },
                ReplyKind::TimeExceeded(_) => EchoOutcome::TimeExceeded {
                    from: reply.responder,
                    rtt,
                },
                ReplyKind::Unreachable(code) => EchoOutcome::Unreachable {
                    from: reply.responder,
                    code,
                    rtt,
                },
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// IPv4 packet carrying the echo reply to `request`, as a raw socket sees it
    fn echo_reply_v4(request: &[u8]) -> Vec<u8> {
        let mut icmp = request.to_vec();
        icmp[0] = 0; // Echo Reply
        icmp[2..4].copy_from_slice(&[0, 0]);
        let cksum = pnet::packet::util::checksum(&icmp, 1);
        icmp[2..4].copy_from_slice(&cksum.to_be_bytes());

        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[8] = 64;
        packet[9] = 1;
        packet.extend_from_slice(&icmp);
        packet
    }

    #[test]
    fn test_concurrent_transports_do_not_share_replies() {
        let mut ping = IcmpTransport::new(32);
        let mut trace = IcmpTransport::new(32);
        assert_ne!(ping.identifier, trace.identifier);

        // Both start their sequences at 1
        let (ping_seq, trace_seq) = (ping.next_sequence(), trace.next_sequence());
        assert_eq!(ping_seq, trace_seq);

        let target: IpAddr = "192.0.2.7".parse().unwrap();
        let reply = echo_reply_v4(&build_echo_request(ping.identifier, ping_seq, 32, false));

        let own = parse_icmp_response(&reply, target, ping.identifier, false).unwrap();
        assert_eq!(own.kind, ReplyKind::EchoReply);
        assert_eq!(own.sequence, ping_seq);
        assert!(parse_icmp_response(&reply, target, trace.identifier, false).is_none());
    }

    #[test]
    fn test_sequence_wraps() {
        let mut transport = IcmpTransport::new(32);
        transport.sequence = u16::MAX;
        assert_eq!(transport.next_sequence(), 0);
        assert_eq!(transport.next_sequence(), 1);
    }

    #[tokio::test]
    #[ignore] // requires CAP_NET_RAW or ping_group_range
    async fn test_echo_localhost() {
        let mut transport = IcmpTransport::new(32);
        let outcome = transport
            .echo("127.0.0.1".parse().unwrap(), None, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(outcome, EchoOutcome::Reply { .. }));
    }
}
