use std::net::IpAddr;
use std::time::Duration;

use crate::error::ProbeError;
use crate::lookup::resolve::{AddressFamily, TargetResolver};
use crate::probe::{EchoOutcome, EchoTransport};
use crate::state::{EchoRecord, EchoStats, EchoStatus, ResultEvent, SessionContext};

/// Parameters for one ping run
#[derive(Debug, Clone)]
pub struct PingPlan {
    pub target: String,
    pub count: u32,
    pub timeout: Duration,
    pub interval: Duration,
    pub family: AddressFamily,
}

/// Send `count` echo requests, one at a time, and publish a summary.
///
/// Individual echo failures become failure lines; only cancellation and a
/// target name that does not exist end the run early.
pub async fn run<T: EchoTransport, R: TargetResolver>(
    ctx: &SessionContext,
    plan: &PingPlan,
    transport: &mut T,
    resolver: &R,
) -> Result<(), ProbeError> {
    let mut stats = EchoStats::new();
    let outcome = match ctx.guard(resolver.resolve(&plan.target, plan.family)).await {
        Ok(resolved) => {
            let shown = match resolved {
                Ok(ip) => ip.to_string(),
                Err(e) => {
                    tracing::debug!("display resolution failed: {e}");
                    "unresolved".to_string()
                }
            };
            ctx.info(format!(
                "Pinging {} [{}] with {} requests:",
                plan.target, shown, plan.count
            ));
            ping_loop(ctx, plan, transport, resolver, &mut stats).await
        }
        Err(cancelled) => Err(cancelled),
    };

    // Summary covers whatever was sent, including partial runs
    ctx.emit(ResultEvent::Summary(stats.summary()));

    if matches!(outcome, Err(ProbeError::Cancelled)) {
        ctx.info("Ping operation cancelled.");
    }
    outcome
}

async fn ping_loop<T: EchoTransport, R: TargetResolver>(
    ctx: &SessionContext,
    plan: &PingPlan,
    transport: &mut T,
    resolver: &R,
    stats: &mut EchoStats,
) -> Result<(), ProbeError> {
    for seq in 1..=plan.count {
        if ctx.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        // Re-resolved every iteration; only a name that does not exist stops the run
        let outcome = match ctx.guard(resolver.resolve(&plan.target, plan.family)).await? {
            Ok(target) => send_echo(ctx, plan, transport, target, stats).await?,
            Err(e) if e.is_host_not_found() => {
                ctx.emit(ResultEvent::Echo(EchoRecord {
                    seq,
                    outcome: EchoStatus::Failed(format!("Ping Error: {e}")),
                }));
                return Err(e);
            }
            Err(e) => {
                tracing::debug!(seq, "resolution failed: {e}");
                EchoStatus::Failed(format!("Ping Error: {e}"))
            }
        };
        ctx.emit(ResultEvent::Echo(EchoRecord { seq, outcome }));

        if seq < plan.count {
            ctx.sleep(plan.interval).await?;
        }
    }
    Ok(())
}

async fn send_echo<T: EchoTransport>(
    ctx: &SessionContext,
    plan: &PingPlan,
    transport: &mut T,
    target: IpAddr,
    stats: &mut EchoStats,
) -> Result<EchoStatus, ProbeError> {
    stats.record_sent();
    Ok(match ctx.guard(transport.echo(target, None, plan.timeout)).await? {
        Ok(EchoOutcome::Reply {
            from,
            rtt,
            bytes,
            ttl,
        }) => {
            stats.record_response(rtt);
            EchoStatus::Reply {
                from,
                bytes,
                rtt,
                ttl,
            }
        }
        Ok(EchoOutcome::TimedOut) => EchoStatus::Failed("TimedOut".to_string()),
        Ok(EchoOutcome::TimeExceeded { from, .. }) => {
            EchoStatus::Failed(format!("TtlExpired (from {from})"))
        }
        Ok(EchoOutcome::Unreachable { from, code, .. }) => {
            EchoStatus::Failed(format!("DestinationUnreachable (code {code}, from {from})"))
        }
        Err(e) => {
            tracing::debug!("echo failed: {e:#}");
            EchoStatus::Failed(format!("Socket Error: {e:#}"))
        }
    })
}
