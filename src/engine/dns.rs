use crate::error::ProbeError;
use crate::lookup::dns::{DNS_PORT, DnsQuery, DnsResolver, display_name};
use crate::state::{ResultEvent, SessionContext};

/// Run one DNS query and report each record in server order
pub async fn run(
    ctx: &SessionContext,
    resolver: &DnsResolver,
    query: &DnsQuery,
) -> Result<(), ProbeError> {
    match query.server {
        Some(server) if server.port() == DNS_PORT => {
            ctx.info(format!("Using DNS Server: {}", server.ip()))
        }
        Some(server) => ctx.info(format!("Using DNS Server: {server}")),
        None => ctx.info("Using System Default DNS Servers"),
    }

    let name = display_name(&query.name);
    if query.reverse {
        ctx.info(format!("Performing reverse lookup using: {name}"));
    }
    ctx.info(format!(
        "Querying for {} records for: {name}",
        query.record_type
    ));

    let records = ctx.guard(resolver.execute(query)).await??;
    if records.is_empty() {
        ctx.info("No records found.");
        return Ok(());
    }

    ctx.info(format!("Found {} record(s):", records.len()));
    for record in records {
        ctx.emit(ResultEvent::DnsRecord(record));
    }
    Ok(())
}
