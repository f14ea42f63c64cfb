use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverOpts;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use super::{sanitize_display, system_resolver};

/// Entry count at which expired answers are swept out
const CACHE_CAPACITY: usize = 4096;

/// DNS cache entry
struct CacheEntry {
    hostname: Option<String>,
    cached_at: Instant,
}

/// Reverse DNS lookups with a per-address cache
pub struct ReverseDns {
    resolver: TokioResolver,
    cache: RwLock<HashMap<IpAddr, CacheEntry>>,
    cache_ttl: Duration,
    cache_capacity: usize,
    timeout: Duration,
}

impl ReverseDns {
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;

        Self {
            resolver: system_resolver(opts),
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(3600), // 1 hour
            cache_capacity: CACHE_CAPACITY,
            timeout,
        }
    }

    /// Lookup reverse DNS for an IP, using cache.
    ///
    /// Failures and timeouts yield None and are cached like any other answer.
    pub async fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        if let Some(hostname) = self.cached(ip) {
            return hostname;
        }

        let hostname = match tokio::time::timeout(self.timeout, self.resolver.reverse_lookup(ip)).await
        {
            Ok(Ok(lookup)) => lookup
                .iter()
                .next()
                .map(|name| sanitize_display(name.to_string().trim_end_matches('.'))),
            Ok(Err(e)) => {
                tracing::debug!(%ip, "reverse lookup failed: {e}");
                None
            }
            Err(_) => {
                tracing::debug!(%ip, "reverse lookup timed out");
                None
            }
        };

        self.store(ip, hostname.clone());
        hostname
    }

    fn cached(&self, ip: IpAddr) -> Option<Option<String>> {
        let cache = self.cache.read();
        cache
            .get(&ip)
            .filter(|entry| entry.cached_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.hostname.clone())
    }

    fn store(&self, ip: IpAddr, hostname: Option<String>) {
        let mut cache = self.cache.write();
        if cache.len() >= self.cache_capacity {
            let ttl = self.cache_ttl;
            cache.retain(|_, entry| entry.cached_at.elapsed() < ttl);
            // Still full of fresh answers: start over rather than grow
            if cache.len() >= self.cache_capacity {
                cache.clear();
            }
        }
        cache.insert(
            ip,
            CacheEntry {
                hostname,
                cached_at: Instant::now(),
            },
        );
    }
}
