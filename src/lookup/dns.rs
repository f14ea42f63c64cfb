use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::ProtoErrorKind;
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::{Name, RData, Record};
use hickory_resolver::{ResolveError, ResolveErrorKind, Resolver, TokioResolver};
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

pub use hickory_resolver::proto::rr::RecordType;

pub const DNS_PORT: u16 = 53;

use super::{sanitize_display, system_resolver};
use crate::error::ProbeError;

/// One DNS answer record, decoded for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsRecord {
    pub name: String,
    pub ttl: u32,
    #[serde(flatten)]
    pub data: RecordData,
}

/// Type-specific record fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum RecordData {
    A {
        address: Ipv4Addr,
    },
    Aaaa {
        address: Ipv6Addr,
    },
    Cname {
        target: String,
    },
    Mx {
        preference: u16,
        exchange: String,
    },
    Ns {
        target: String,
    },
    Ptr {
        target: String,
    },
    Soa {
        mname: String,
        rname: String,
        serial: u32,
        refresh: i32,
        retry: i32,
        expire: i32,
        minimum: u32,
    },
    Txt {
        strings: Vec<String>,
    },
    /// Any other type, kept in presentation format
    Other {
        record_type: String,
        raw: String,
    },
}

impl RecordData {
    pub fn record_type(&self) -> String {
        match self {
            RecordData::A { .. } => "A".to_string(),
            RecordData::Aaaa { .. } => "AAAA".to_string(),
            RecordData::Cname { .. } => "CNAME".to_string(),
            RecordData::Mx { .. } => "MX".to_string(),
            RecordData::Ns { .. } => "NS".to_string(),
            RecordData::Ptr { .. } => "PTR".to_string(),
            RecordData::Soa { .. } => "SOA".to_string(),
            RecordData::Txt { .. } => "TXT".to_string(),
            RecordData::Other { record_type, .. } => record_type.clone(),
        }
    }
}

/// Human-readable name without the root label
pub(crate) fn display_name(name: &Name) -> String {
    let text = name.to_utf8();
    let trimmed = text.trim_end_matches('.');
    sanitize_display(if trimmed.is_empty() { "." } else { trimmed })
}

impl From<&Record> for DnsRecord {
    fn from(record: &Record) -> Self {
        let data = match record.data() {
            RData::A(a) => RecordData::A { address: a.0 },
            RData::AAAA(aaaa) => RecordData::Aaaa { address: aaaa.0 },
            RData::CNAME(cname) => RecordData::Cname {
                target: display_name(&cname.0),
            },
            RData::MX(mx) => RecordData::Mx {
                preference: mx.preference(),
                exchange: display_name(mx.exchange()),
            },
            RData::NS(ns) => RecordData::Ns {
                target: display_name(&ns.0),
            },
            RData::PTR(ptr) => RecordData::Ptr {
                target: display_name(&ptr.0),
            },
            RData::SOA(soa) => RecordData::Soa {
                mname: display_name(soa.mname()),
                rname: display_name(soa.rname()),
                serial: soa.serial(),
                refresh: soa.refresh(),
                retry: soa.retry(),
                expire: soa.expire(),
                minimum: soa.minimum(),
            },
            RData::TXT(txt) => RecordData::Txt {
                strings: txt
                    .txt_data()
                    .iter()
                    .map(|s| sanitize_display(&String::from_utf8_lossy(s)))
                    .collect(),
            },
            other => RecordData::Other {
                record_type: record.record_type().to_string(),
                raw: sanitize_display(&other.to_string()),
            },
        };

        DnsRecord {
            name: display_name(record.name()),
            ttl: record.ttl(),
            data,
        }
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ttl = self.ttl;
        match &self.data {
            RecordData::A { address } => write!(f, "A: {address} (TTL: {ttl})"),
            RecordData::Aaaa { address } => write!(f, "AAAA: {address} (TTL: {ttl})"),
            RecordData::Cname { target } => write!(f, "CNAME: {target} (TTL: {ttl})"),
            RecordData::Mx {
                preference,
                exchange,
            } => write!(f, "MX: {exchange} (Pref: {preference}, TTL: {ttl})"),
            RecordData::Ns { target } => write!(f, "NS: {target} (TTL: {ttl})"),
            RecordData::Ptr { target } => write!(f, "PTR: {target} (TTL: {ttl})"),
            RecordData::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => write!(
                f,
                "SOA: {mname} {rname} (Serial: {serial}, Refresh: {refresh}, Retry: {retry}, \
                 Expire: {expire}, Minimum: {minimum}, TTL: {ttl})"
            ),
            RecordData::Txt { strings } => {
                let quoted: Vec<String> = strings.iter().map(|s| format!("\"{s}\"")).collect();
                write!(f, "TXT: {} (TTL: {ttl})", quoted.join(" "))
            }
            RecordData::Other { record_type, raw } => write!(f, "{record_type}: {raw} (TTL: {ttl})"),
        }
    }
}

/// Build the reverse-lookup (ARPA) name for an address
pub fn reverse_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa.")
        }
        IpAddr::V6(v6) => {
            let mut name = String::with_capacity(72);
            for byte in v6.octets().iter().rev() {
                name.push_str(&format!("{:x}.{:x}.", byte & 0x0F, byte >> 4));
            }
            name.push_str("ip6.arpa.");
            name
        }
    }
}

/// Parse a record type name such as `"MX"` (case-insensitive)
pub fn parse_record_type(text: &str) -> Result<RecordType, ProbeError> {
    let upper = text.trim().to_ascii_uppercase();
    match RecordType::from_str(&upper) {
        Ok(RecordType::Unknown(_)) | Err(_) => {
            Err(ProbeError::invalid(format!("Unsupported record type: '{}'", text.trim())))
        }
        Ok(rtype) => Ok(rtype),
    }
}

/// Interpret the optional server field: an address, optionally with a port.
/// Anything else selects the system default.
pub fn parse_server(server: Option<&str>) -> Option<SocketAddr> {
    let text = server.map(str::trim).filter(|s| !s.is_empty())?;
    if let Ok(ip) = text.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, DNS_PORT));
    }
    match text.parse::<SocketAddr>() {
        Ok(addr) => Some(addr),
        Err(_) => {
            tracing::warn!(server = text, "DNS server is not an IP address, using system default");
            None
        }
    }
}

/// A validated query, ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct DnsQuery {
    pub name: Name,
    pub record_type: RecordType,
    pub server: Option<SocketAddr>,
    /// True when `name` was derived from an address for a PTR lookup
    pub reverse: bool,
}

impl DnsQuery {
    pub fn new(name: &str, record_type: RecordType, server: Option<&str>) -> Result<Self, ProbeError> {
        let input = name.trim();
        if input.is_empty() {
            return Err(ProbeError::invalid("DNS name is empty"));
        }

        let (text, reverse) = match input.parse::<IpAddr>() {
            Ok(ip) if record_type == RecordType::PTR => (reverse_name(ip), true),
            _ => (input.to_string(), false),
        };

        let mut name = Name::from_utf8(&text).map_err(|e| {
            if reverse {
                ProbeError::invalid(format!("Could not generate reverse lookup name for '{input}'"))
            } else {
                ProbeError::invalid(format!("Invalid domain name '{input}': {e}"))
            }
        })?;
        name.set_fqdn(true);

        Ok(Self {
            name,
            record_type,
            server: parse_server(server),
            reverse,
        })
    }
}

/// Result of a complete query
#[derive(Debug, Clone, PartialEq)]
pub struct DnsAnswer {
    pub server: Option<SocketAddr>,
    pub query_name: String,
    pub records: Vec<DnsRecord>,
}

/// Typed DNS queries against the system resolver or a chosen server
pub struct DnsResolver {
    system: TokioResolver,
    timeout: Duration,
}

impl DnsResolver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            system: system_resolver(Self::options(timeout)),
            timeout,
        }
    }

    fn options(timeout: Duration) -> ResolverOpts {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.preserve_intermediates = true;
        opts
    }

    fn server_resolver(&self, server: SocketAddr) -> TokioResolver {
        let config = ResolverConfig::from_parts(
            None,
            vec![],
            NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true),
        );
        Resolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(Self::options(self.timeout))
            .build()
    }

    /// Validate, then run one query
    pub async fn resolve(
        &self,
        name: &str,
        record_type: RecordType,
        server: Option<&str>,
    ) -> Result<DnsAnswer, ProbeError> {
        let query = DnsQuery::new(name, record_type, server)?;
        let records = self.execute(&query).await?;
        Ok(DnsAnswer {
            server: query.server,
            query_name: display_name(&query.name),
            records,
        })
    }

    /// Send a validated query. An empty answer is not an error.
    pub async fn execute(&self, query: &DnsQuery) -> Result<Vec<DnsRecord>, ProbeError> {
        let custom = query.server.map(|addr| self.server_resolver(addr));
        let resolver = custom.as_ref().unwrap_or(&self.system);

        tracing::debug!(name = %query.name, rtype = %query.record_type, server = ?query.server, "dns query");
        let lookup = tokio::time::timeout(
            self.timeout,
            resolver.lookup(query.name.clone(), query.record_type),
        )
        .await
        .map_err(|_| ProbeError::Timeout("DNS query timed out".to_string()))?;

        match lookup {
            Ok(lookup) => Ok(lookup.records().iter().map(DnsRecord::from).collect()),
            Err(e) => classify_error(&e),
        }
    }
}

/// Map resolver failures onto the probe taxonomy
fn classify_error(err: &ResolveError) -> Result<Vec<DnsRecord>, ProbeError> {
    if let ResolveErrorKind::Proto(proto) = err.kind() {
        match proto.kind() {
            ProtoErrorKind::NoRecordsFound { response_code, .. } => {
                return if *response_code == ResponseCode::NoError {
                    Ok(Vec::new())
                } else {
                    Err(ProbeError::Protocol(format!("{response_code:?}")))
                };
            }
            ProtoErrorKind::Timeout => {
                return Err(ProbeError::Timeout("DNS query timed out".to_string()));
            }
            _ => {}
        }
    }
    Err(ProbeError::Transport(err.to_string()))
}
