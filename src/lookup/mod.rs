pub mod dns;
pub mod rdns;
pub mod resolve;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};

pub use dns::{DnsAnswer, DnsQuery, DnsRecord, DnsResolver, RecordData, RecordType};
pub use rdns::ReverseDns;
pub use resolve::{
    AddressFamily, SystemResolver, TargetResolver, resolve_target, resolve_target_with,
};

/// Sanitize a string for safe terminal display by removing control characters.
///
/// DNS names come off the wire and may carry escape sequences.
pub(crate) fn sanitize_display(s: &str) -> String {
    s.chars().filter(|c| !c.is_control()).collect()
}

/// Resolver using the system configuration, falling back to Google DNS when
/// the system configuration cannot be read
pub(crate) fn system_resolver(opts: ResolverOpts) -> TokioResolver {
    match Resolver::builder_tokio() {
        Ok(builder) => builder.with_options(opts).build(),
        Err(e) => {
            tracing::warn!("System DNS config unavailable ({e}), using Google DNS (8.8.8.8)");
            Resolver::builder_with_config(
                ResolverConfig::google(),
                TokioConnectionProvider::default(),
            )
            .with_options(opts)
            .build()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_display_strips_escapes() {
        assert_eq!(sanitize_display("host\x1b[31m.example"), "host[31m.example");
        assert_eq!(sanitize_display("plain.example.com"), "plain.example.com");
    }
}
