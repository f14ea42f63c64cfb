use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::IpAddr;

use crate::error::ProbeError;

/// Which address family to pick when a name has both
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// Prefer IPv4, accept IPv6
    #[default]
    Any,
    V4,
    V6,
}

/// Name lookup used by the probes that re-resolve while running
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Lookups that might succeed on retry fail with a temporary `Resolution`
    async fn resolve(&self, target: &str, family: AddressFamily) -> Result<IpAddr, ProbeError>;
}

/// The operating system resolver (getaddrinfo)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl TargetResolver for SystemResolver {
    async fn resolve(&self, target: &str, family: AddressFamily) -> Result<IpAddr, ProbeError> {
        resolve_target_with(target, family).await
    }
}

/// Resolve a target to a single address, preferring IPv4
pub async fn resolve_target(target: &str) -> Result<IpAddr, ProbeError> {
    resolve_target_with(target, AddressFamily::Any).await
}

/// Resolve a target to a single address of the requested family.
///
/// Literal addresses are returned as-is without touching the resolver.
pub async fn resolve_target_with(target: &str, family: AddressFamily) -> Result<IpAddr, ProbeError> {
    let target = target.trim();
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<IpAddr> = match tokio::net::lookup_host((target, 0)).await {
        Ok(addrs) => addrs.map(|s| s.ip()).collect(),
        Err(e) if is_transient(&e) => {
            tracing::debug!(target, "resolution failed, may be temporary: {e}");
            return Err(ProbeError::unresolved_for_now(target));
        }
        Err(e) => {
            tracing::debug!(target, "resolution failed: {e}");
            return Err(ProbeError::unresolved(target));
        }
    };

    pick_address(&addrs, family).ok_or_else(|| ProbeError::unresolved(target))
}

/// Whether a failed lookup could succeed if retried (EAI_AGAIN, EAI_SYSTEM)
fn is_transient(err: &io::Error) -> bool {
    // EAI_SYSTEM is reported as the underlying OS error
    if err.raw_os_error().is_some() {
        return true;
    }
    let text = err.to_string().to_ascii_lowercase();
    text.contains("temporary failure") || text.contains("try again")
}

/// Choose one address from a resolver answer
pub(crate) fn pick_address(addrs: &[IpAddr], family: AddressFamily) -> Option<IpAddr> {
    match family {
        AddressFamily::V4 => addrs.iter().find(|ip| ip.is_ipv4()).copied(),
        AddressFamily::V6 => addrs.iter().find(|ip| ip.is_ipv6()).copied(),
        AddressFamily::Any => addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied(),
    }
}
