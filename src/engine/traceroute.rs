use std::net::IpAddr;
use std::time::Duration;

use crate::error::ProbeError;
use crate::lookup::ReverseDns;
use crate::lookup::resolve::{AddressFamily, resolve_target_with};
use crate::probe::{EchoOutcome, EchoTransport};
use crate::state::{HopRecord, ResultEvent, SessionContext};

#[derive(Debug, Clone)]
pub struct TracePlan {
    pub target: String,
    pub max_hops: u8,
    pub timeout: Duration,
    pub family: AddressFamily,
}

/// Walk the path to the target one TTL at a time.
///
/// Hops are numbered from 1 and emitted in order; the walk stops at the first
/// echo reply or after `max_hops`.
pub async fn run<T: EchoTransport>(
    ctx: &SessionContext,
    plan: &TracePlan,
    transport: &mut T,
    rdns: Option<&ReverseDns>,
) -> Result<(), ProbeError> {
    let target = ctx
        .guard(resolve_target_with(&plan.target, plan.family))
        .await??;
    ctx.info(format!(
        "Tracing route to {} [{}] over a maximum of {} hops:",
        plan.target, target, plan.max_hops
    ));

    ctx.guard(transport.prepare(target))
        .await?
        .map_err(|e| ProbeError::Transport(format!("{e:#}")))?;

    match trace_loop(ctx, plan, target, transport, rdns).await {
        Err(ProbeError::Cancelled) => {
            ctx.info("Traceroute cancelled by user.");
            Err(ProbeError::Cancelled)
        }
        other => other,
    }
}

async fn trace_loop<T: EchoTransport>(
    ctx: &SessionContext,
    plan: &TracePlan,
    target: IpAddr,
    transport: &mut T,
    rdns: Option<&ReverseDns>,
) -> Result<(), ProbeError> {
    for ttl in 1..=plan.max_hops {
        if ctx.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        let outcome = ctx
            .guard(transport.echo(target, Some(ttl), plan.timeout))
            .await?;
        let (hop, reached) = match outcome {
            Ok(EchoOutcome::Reply { from, rtt, .. }) => {
                (answered(ctx, ttl, from, rtt, rdns).await?, true)
            }
            Ok(EchoOutcome::TimeExceeded { from, rtt }) => {
                (answered(ctx, ttl, from, rtt, rdns).await?, false)
            }
            Ok(EchoOutcome::TimedOut) => (
                HopRecord {
                    ttl,
                    rtt: None,
                    address: None,
                    hostname: None,
                    note: None,
                },
                false,
            ),
            Ok(EchoOutcome::Unreachable { from, code, rtt }) => (
                HopRecord {
                    ttl,
                    rtt: Some(rtt),
                    address: Some(from),
                    hostname: None,
                    note: Some(format!("{from} reports: DestinationUnreachable (code {code})")),
                },
                false,
            ),
            Err(e) => {
                tracing::debug!(ttl, "hop probe failed: {e:#}");
                (
                    HopRecord {
                        ttl,
                        rtt: None,
                        address: None,
                        hostname: None,
                        note: Some(format!("Error: {e:#}")),
                    },
                    false,
                )
            }
        };
        ctx.emit(ResultEvent::Hop(hop));

        if reached {
            ctx.info("Trace complete.");
            return Ok(());
        }
    }

    ctx.info("Trace incomplete (max hops reached).");
    Ok(())
}

async fn answered(
    ctx: &SessionContext,
    ttl: u8,
    from: IpAddr,
    rtt: Duration,
    rdns: Option<&ReverseDns>,
) -> Result<HopRecord, ProbeError> {
    let hostname = match rdns {
        Some(rdns) => ctx.guard(rdns.reverse_lookup(from)).await?,
        None => None,
    };
    Ok(HopRecord {
        ttl,
        rtt: Some(rtt),
        address: Some(from),
        hostname,
        note: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{ScriptedTransport, collect, drain, reply, router, run_session, start};
    use crate::error::ErrorKind;
    use crate::state::{ProbeKind, SessionState};

    fn plan(max_hops: u8) -> TracePlan {
        TracePlan {
            target: "127.0.0.1".to_string(),
            max_hops,
            timeout: Duration::from_millis(100),
            family: AddressFamily::Any,
        }
    }

    fn hops(results: &[ResultEvent]) -> Vec<HopRecord> {
        collect(results, |r| match r {
            ResultEvent::Hop(h) => Some(h.clone()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_stops_at_destination() {
        let transport = ScriptedTransport::new(vec![
            router(1, 1),
            Ok(EchoOutcome::TimedOut),
            router(3, 3),
            reply(4),
            reply(5),
        ]);
        let calls = transport.calls();
        let ttls = transport.ttls();
        let (state, results) = run_session(ProbeKind::Traceroute, move |ctx| async move {
            let mut transport = transport;
            run(&ctx, &plan(30), &mut transport, None).await
        })
        .await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(
            results[0],
            ResultEvent::Info("Tracing route to 127.0.0.1 [127.0.0.1] over a maximum of 30 hops:".into())
        );
        let hops = hops(&results);
        let numbers: Vec<u8> = hops.iter().map(|h| h.ttl).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(hops[0].address, Some("192.0.2.1".parse().unwrap()));
        assert_eq!(hops[1].address, None);
        assert_eq!(hops[1].rtt, None);
        assert_eq!(hops[3].address, Some("127.0.0.1".parse().unwrap()));

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 4);
        assert_eq!(*ttls.lock(), vec![Some(1), Some(2), Some(3), Some(4)]);

        let n = results.len();
        assert_eq!(results[n - 2], ResultEvent::Info("Trace complete.".into()));
        assert_eq!(results[n - 1], ResultEvent::Done);
    }

    #[tokio::test]
    async fn test_max_hops_reached() {
        let transport = ScriptedTransport::new(vec![]);
        let (state, results) = run_session(ProbeKind::Traceroute, move |ctx| async move {
            let mut transport = transport;
            run(&ctx, &plan(3), &mut transport, None).await
        })
        .await;

        assert_eq!(state, SessionState::Completed);
        assert_eq!(hops(&results).len(), 3);
        assert!(results.contains(&ResultEvent::Info("Trace incomplete (max hops reached).".into())));
    }

    #[tokio::test]
    async fn test_failed_hops_continue() {
        let transport = ScriptedTransport::new(vec![
            Err(anyhow::anyhow!("send failed")),
            Ok(EchoOutcome::Unreachable {
                from: "192.0.2.9".parse().unwrap(),
                code: 13,
                rtt: Duration::from_millis(7),
            }),
            reply(9),
        ]);
        let (state, results) = run_session(ProbeKind::Traceroute, move |ctx| async move {
            let mut transport = transport;
            run(&ctx, &plan(10), &mut transport, None).await
        })
        .await;

        assert_eq!(state, SessionState::Completed);
        let hops = hops(&results);
        assert_eq!(hops.len(), 3);
        assert!(hops[0].note.as_deref().unwrap().contains("send failed"));
        assert!(hops[1].note.as_deref().unwrap().contains("code 13"));
        assert!(hops[2].note.is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_target_is_fatal() {
        let transport = ScriptedTransport::new(vec![]);
        let calls = transport.calls();
        let (state, results) = run_session(ProbeKind::Traceroute, move |ctx| async move {
            let mut transport = transport;
            let plan = TracePlan {
                target: "no-such-host.invalid".to_string(),
                ..plan(30)
            };
            run(&ctx, &plan, &mut transport, None).await
        })
        .await;

        assert_eq!(state, SessionState::Failed);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0],
            ResultEvent::Error {
                kind: ErrorKind::Resolution,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_socket_failure_is_fatal() {
        let transport =
            ScriptedTransport::new(vec![]).with_prepare_error("Insufficient permissions for ICMP sockets.");
        let calls = transport.calls();
        let (state, results) = run_session(ProbeKind::Traceroute, move |ctx| async move {
            let mut transport = transport;
            run(&ctx, &plan(30), &mut transport, None).await
        })
        .await;

        assert_eq!(state, SessionState::Failed);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(
            results[1],
            ResultEvent::Error {
                kind: ErrorKind::Transport,
                message: "Insufficient permissions for ICMP sockets.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_unwinds_in_flight_hop() {
        let transport = ScriptedTransport::new(vec![]).with_delay(Duration::from_secs(60));
        let (session, mut rx) = start(ProbeKind::Traceroute, move |ctx| async move {
            let mut transport = transport;
            run(&ctx, &plan(30), &mut transport, None).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.cancel();

        let (state, results) = drain(&mut rx).await;
        assert_eq!(state, SessionState::Cancelled);
        assert!(hops(&results).is_empty());
        let n = results.len();
        assert_eq!(results[n - 2], ResultEvent::Info("Traceroute cancelled by user.".into()));
        assert_eq!(results[n - 1], ResultEvent::Done);
    }
}
