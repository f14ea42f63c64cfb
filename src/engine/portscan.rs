use futures::stream::{self, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use crate::error::ProbeError;
use crate::lookup::resolve::{AddressFamily, resolve_target_with};
use crate::portspec::PortSpec;
use crate::state::{PortRecord, PortStatus, ResultEvent, SessionContext};

#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub target: String,
    pub ports: PortSpec,
    pub timeout: Duration,
    /// Connects in flight at once; 1 probes strictly one port at a time
    pub concurrency: usize,
    pub family: AddressFamily,
}

#[derive(Debug, Default)]
struct Tally {
    open: usize,
    closed: usize,
    filtered: usize,
    errors: usize,
}

impl Tally {
    fn add(&mut self, status: &PortStatus) {
        match status {
            PortStatus::Open => self.open += 1,
            PortStatus::Closed => self.closed += 1,
            PortStatus::Filtered => self.filtered += 1,
            PortStatus::Error(_) => self.errors += 1,
        }
    }
}

/// TCP connect scan.
///
/// The target is resolved once; failing that aborts the scan before any port
/// is probed. Results are emitted in ascending port order whatever the
/// concurrency.
pub async fn run(ctx: &SessionContext, plan: &ScanPlan) -> Result<(), ProbeError> {
    ctx.info(format!("Starting TCP port scan for {}...", plan.target));

    let ip = ctx
        .guard(resolve_target_with(&plan.target, plan.family))
        .await??;
    tracing::debug!(%ip, ports = plan.ports.len(), concurrency = plan.concurrency, "scanning");

    let timeout = plan.timeout;
    let mut results = std::pin::pin!(
        stream::iter(plan.ports.ports().to_vec())
            .map(|port| probe_port(SocketAddr::new(ip, port), timeout))
            .buffered(plan.concurrency.max(1))
    );

    let mut tally = Tally::default();
    loop {
        let next = match ctx.guard(results.next()).await {
            Ok(next) => next,
            Err(e) => {
                ctx.info("Scan cancelled by user.");
                return Err(e);
            }
        };
        let Some(record) = next else {
            break;
        };
        tally.add(&record.status);
        ctx.emit(ResultEvent::Port(record));
    }

    ctx.info(format!(
        "Scan complete: {} open, {} closed, {} filtered, {} errors.",
        tally.open, tally.closed, tally.filtered, tally.errors
    ));
    Ok(())
}

/// Connect once, bounded by `timeout`
pub async fn probe_port(addr: SocketAddr, timeout: Duration) -> PortRecord {
    let started = Instant::now();
    let status = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            PortStatus::Open
        }
        Ok(Err(e)) => classify_connect_error(&e),
        Err(_) => PortStatus::Filtered,
    };
    PortRecord {
        port: addr.port(),
        status,
        elapsed: started.elapsed(),
    }
}

fn classify_connect_error(err: &io::Error) -> PortStatus {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => PortStatus::Closed,
        io::ErrorKind::TimedOut => PortStatus::Filtered,
        kind => PortStatus::Error(format!("{kind:?}")),
    }
}
