use reqwest::Url;
use std::time::Duration;

use crate::error::ProbeError;
use crate::lookup::dns::{DnsQuery, RecordType};
use crate::portspec::PortSpec;
use crate::state::ProbeKind;

pub const MAX_HOPS_LIMIT: u8 = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingRequest {
    pub target: String,
    pub count: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerouteRequest {
    pub target: String,
    pub max_hops: u8,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortScanRequest {
    pub target: String,
    pub ports: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRequest {
    pub name: String,
    pub record_type: RecordType,
    pub server: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
}

/// Everything `ProbeEngine::start` accepts. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeRequest {
    Ping(PingRequest),
    Traceroute(TracerouteRequest),
    PortScan(PortScanRequest),
    Dns(DnsRequest),
    Http(HttpRequest),
}

impl ProbeRequest {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeRequest::Ping(_) => ProbeKind::Ping,
            ProbeRequest::Traceroute(_) => ProbeKind::Traceroute,
            ProbeRequest::PortScan(_) => ProbeKind::PortScan,
            ProbeRequest::Dns(_) => ProbeKind::Dns,
            ProbeRequest::Http(_) => ProbeKind::Http,
        }
    }

    /// Check every field without touching the network
    pub fn validate(&self) -> Result<ValidRequest, ProbeError> {
        Ok(match self {
            ProbeRequest::Ping(req) => {
                if req.count == 0 {
                    return Err(ProbeError::invalid("Count must be greater than zero"));
                }
                ValidRequest::Ping {
                    target: check_target(&req.target)?,
                    count: req.count,
                    timeout: check_timeout(req.timeout_ms)?,
                }
            }
            ProbeRequest::Traceroute(req) => {
                if !(1..=MAX_HOPS_LIMIT).contains(&req.max_hops) {
                    return Err(ProbeError::invalid(format!(
                        "Max hops must be between 1 and {MAX_HOPS_LIMIT}"
                    )));
                }
                ValidRequest::Traceroute {
                    target: check_target(&req.target)?,
                    max_hops: req.max_hops,
                    timeout: check_timeout(req.timeout_ms)?,
                }
            }
            ProbeRequest::PortScan(req) => ValidRequest::PortScan {
                target: check_target(&req.target)?,
                ports: PortSpec::parse(&req.ports)?,
                timeout: check_timeout(req.timeout_ms)?,
            },
            ProbeRequest::Dns(req) => ValidRequest::Dns(DnsQuery::new(
                &req.name,
                req.record_type,
                req.server.as_deref(),
            )?),
            ProbeRequest::Http(req) => ValidRequest::Http(check_url(&req.url)?),
        })
    }
}

/// A request whose fields have been checked and parsed
#[derive(Debug, Clone, PartialEq)]
pub enum ValidRequest {
    Ping {
        target: String,
        count: u32,
        timeout: Duration,
    },
    Traceroute {
        target: String,
        max_hops: u8,
        timeout: Duration,
    },
    PortScan {
        target: String,
        ports: PortSpec,
        timeout: Duration,
    },
    Dns(DnsQuery),
    Http(Url),
}

fn check_target(target: &str) -> Result<String, ProbeError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ProbeError::invalid("Target host is empty"));
    }
    if target.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ProbeError::invalid(format!("Invalid target: '{target}'")));
    }
    Ok(target.to_string())
}

fn check_timeout(timeout_ms: u64) -> Result<Duration, ProbeError> {
    if timeout_ms == 0 {
        return Err(ProbeError::invalid("Timeout must be greater than zero"));
    }
    Ok(Duration::from_millis(timeout_ms))
}

fn check_url(url: &str) -> Result<Url, ProbeError> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| ProbeError::invalid(format!("Invalid URL '{}': {e}", url.trim())))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(ProbeError::invalid(format!(
            "URL must be an absolute http:// or https:// address: '{}'",
            url.trim()
        ))),
    }
}
