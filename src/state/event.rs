use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use super::session::{ProbeKind, SessionId, SessionState};
use crate::error::ErrorKind;
use crate::lookup::dns::DnsRecord;

/// Everything the engine publishes, in emission order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    State {
        session: SessionId,
        kind: ProbeKind,
        state: SessionState,
    },
    Result {
        session: SessionId,
        result: ResultEvent,
    },
}

impl SessionEvent {
    pub fn session(&self) -> SessionId {
        match self {
            SessionEvent::State { session, .. } | SessionEvent::Result { session, .. } => *session,
        }
    }
}

/// One unit of incremental probe output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResultEvent {
    Info(String),
    Echo(EchoRecord),
    Hop(HopRecord),
    Port(PortRecord),
    DnsRecord(DnsRecord),
    HttpStatus(HttpStatusRecord),
    Summary(PingSummary),
    Error { kind: ErrorKind, message: String },
    Done,
}

/// Outcome of one ping iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EchoRecord {
    pub seq: u32,
    pub outcome: EchoStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoStatus {
    Reply {
        from: IpAddr,
        bytes: usize,
        #[serde(with = "duration_ms")]
        rtt: Duration,
        ttl: Option<u8>,
    },
    Failed(String),
}

/// One traceroute hop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopRecord {
    pub ttl: u8,
    #[serde(with = "opt_duration_ms")]
    pub rtt: Option<Duration>,
    pub address: Option<IpAddr>,
    pub hostname: Option<String>,
    /// Failure text for hops that answered with something other than
    /// time-exceeded or an echo reply
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    Open,
    Closed,
    Filtered,
    Error(String),
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStatus::Open => f.write_str("Open"),
            PortStatus::Closed => f.write_str("Closed"),
            PortStatus::Filtered => f.write_str("Filtered/Timeout"),
            PortStatus::Error(code) => write!(f, "Error ({code})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortRecord {
    pub port: u16,
    pub status: PortStatus,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpStatusRecord {
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingSummary {
    pub sent: u64,
    pub received: u64,
    pub loss_pct: f64,
    #[serde(with = "opt_duration_ms")]
    pub min_rtt: Option<Duration>,
    #[serde(with = "opt_duration_ms")]
    pub max_rtt: Option<Duration>,
    #[serde(with = "opt_duration_ms")]
    pub avg_rtt: Option<Duration>,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl fmt::Display for ResultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultEvent::Info(text) => f.write_str(text),
            ResultEvent::Echo(record) => match &record.outcome {
                EchoStatus::Reply {
                    from,
                    bytes,
                    rtt,
                    ttl,
                } => {
                    write!(f, "Reply from {from}: bytes={bytes} time={:.0}ms", ms(*rtt))?;
                    match ttl {
                        Some(ttl) => write!(f, " TTL={ttl}"),
                        None => Ok(()),
                    }
                }
                EchoStatus::Failed(reason) => write!(f, "Request failed: {reason}"),
            },
            ResultEvent::Hop(hop) => {
                let rtt = match hop.rtt {
                    Some(rtt) => format!("{:>4.0} ms", ms(rtt)),
                    None => "   *   ".to_string(),
                };
                write!(f, "{:>2} {rtt}  ", hop.ttl)?;
                match (&hop.address, &hop.hostname, &hop.note) {
                    (_, _, Some(note)) => f.write_str(note),
                    (Some(addr), Some(name), None) => write!(f, "{name} [{addr}]"),
                    (Some(addr), None, None) => write!(f, "{addr}"),
                    (None, _, None) => f.write_str("Request timed out."),
                }
            }
            ResultEvent::Port(port) => write!(
                f,
                "Port {}: {} ({:.0}ms)",
                port.port,
                port.status,
                ms(port.elapsed)
            ),
            ResultEvent::DnsRecord(record) => write!(f, "  {record}"),
            ResultEvent::HttpStatus(status) => {
                write!(f, "Status Code: {} ({})", status.code, status.reason)
            }
            ResultEvent::Summary(summary) => {
                writeln!(f, "Ping statistics:")?;
                write!(
                    f,
                    "    Packets: Sent = {}, Received = {}, Lost = {} ({:.0}% loss)",
                    summary.sent,
                    summary.received,
                    summary.sent - summary.received,
                    summary.loss_pct
                )?;
                if let (Some(min), Some(max), Some(avg)) =
                    (summary.min_rtt, summary.max_rtt, summary.avg_rtt)
                {
                    write!(
                        f,
                        "\nApproximate round trip times in milli-seconds:\n    Minimum = {:.0}ms, Maximum = {:.0}ms, Average = {:.0}ms",
                        ms(min),
                        ms(max),
                        ms(avg)
                    )?;
                }
                Ok(())
            }
            ResultEvent::Error { kind, message } => write!(f, "Error ({kind}): {message}"),
            ResultEvent::Done => f.write_str("Done."),
        }
    }
}

/// Serialize a Duration as fractional milliseconds
mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(super::ms(*duration))
    }
}

mod opt_duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&super::ms(*d)),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_reply_line() {
        let event = ResultEvent::Echo(EchoRecord {
            seq: 1,
            outcome: EchoStatus::Reply {
                from: IpAddr::V4(Ipv4Addr::LOCALHOST),
                bytes: 32,
                rtt: Duration::from_millis(3),
                ttl: Some(64),
            },
        });
        assert_eq!(event.to_string(), "Reply from 127.0.0.1: bytes=32 time=3ms TTL=64");
    }

    #[test]
    fn test_hop_lines() {
        let timed_out = ResultEvent::Hop(HopRecord {
            ttl: 3,
            rtt: None,
            address: None,
            hostname: None,
            note: None,
        });
        assert_eq!(timed_out.to_string(), " 3    *     Request timed out.");

        let named = ResultEvent::Hop(HopRecord {
            ttl: 12,
            rtt: Some(Duration::from_millis(14)),
            address: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            hostname: Some("gw.example.net".to_string()),
            note: None,
        });
        assert_eq!(named.to_string(), "12   14 ms  gw.example.net [10.0.0.1]");
    }

    #[test]
    fn test_port_line() {
        let event = ResultEvent::Port(PortRecord {
            port: 81,
            status: PortStatus::Closed,
            elapsed: Duration::from_millis(2),
        });
        assert_eq!(event.to_string(), "Port 81: Closed (2ms)");
    }

    #[test]
    fn test_result_event_json_shape() {
        let event = SessionEvent::Result {
            session: SessionId::from_raw(7),
            result: ResultEvent::Port(PortRecord {
                port: 80,
                status: PortStatus::Open,
                elapsed: Duration::from_millis(1),
            }),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "result");
        assert_eq!(json["session"], 7);
        assert_eq!(json["result"]["type"], "port");
        assert_eq!(json["result"]["data"]["status"], "open");
        assert_eq!(json["result"]["data"]["elapsed"], 1.0);
    }

    #[test]
    fn test_done_serializes_without_data() {
        let json = serde_json::to_value(ResultEvent::Done).unwrap();
        assert_eq!(json["type"], "done");
    }
}
