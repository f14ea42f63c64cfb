//! Session orchestration: validates requests, supersedes the running session
//! of the same kind and spawns each probe onto the runtime.

pub mod dns;
pub mod http;
pub mod ping;
pub mod portscan;
pub mod request;
pub mod traceroute;

#[cfg(test)]
pub(crate) mod testing;

use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::Config;
use crate::error::ProbeError;
use crate::lookup::{DnsResolver, ReverseDns, SystemResolver};
use crate::probe::IcmpTransport;
use crate::state::{ProbeKind, ProbeSession, SessionEvent, SessionId};

use ping::PingPlan;
use portscan::ScanPlan;
use traceroute::TracePlan;

pub use request::{
    DnsRequest, HttpRequest, MAX_HOPS_LIMIT, PingRequest, PortScanRequest, ProbeRequest,
    TracerouteRequest, ValidRequest,
};

/// Traceroute always sends the standard 32-byte payload
const TRACE_PAYLOAD_SIZE: usize = 32;

/// Entry point for running probes.
///
/// Every session publishes into the single event stream returned by
/// [`ProbeEngine::new`]; events carry their session id.
pub struct ProbeEngine {
    config: Config,
    runtime: Handle,
    events: UnboundedSender<SessionEvent>,
    /// Latest session per kind, running or finished
    active: Mutex<HashMap<ProbeKind, ProbeSession>>,
    http: Client,
    dns: Arc<DnsResolver>,
    rdns: Option<Arc<ReverseDns>>,
}

impl ProbeEngine {
    /// Create an engine bound to the current tokio runtime
    pub fn new(config: Config) -> Result<(Self, UnboundedReceiver<SessionEvent>), ProbeError> {
        let config = config.normalized();
        let runtime = Handle::try_current()
            .map_err(|e| ProbeError::Unexpected(format!("no tokio runtime: {e}")))?;
        let http = http::build_client(config.http_timeout, config.http_use_proxy)
            .map_err(|e| ProbeError::Unexpected(format!("failed to build HTTP client: {e}")))?;
        let dns = Arc::new(DnsResolver::new(config.dns_timeout));
        let rdns = config
            .reverse_dns
            .then(|| Arc::new(ReverseDns::new(config.rdns_timeout)));
        let (events, rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                config,
                runtime,
                events,
                active: Mutex::new(HashMap::new()),
                http,
                dns,
                rdns,
            },
            rx,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate `request` and start it in the background.
    ///
    /// Invalid input is rejected here, before any session exists. A session
    /// of the same kind that is still running is cancelled first.
    pub fn start(&self, request: ProbeRequest) -> Result<SessionId, ProbeError> {
        let valid = request.validate()?;
        let kind = request.kind();
        let session = ProbeSession::new(kind, self.events.clone());

        let previous = self.active.lock().insert(kind, session.clone());
        if let Some(previous) = previous
            && !previous.is_finished()
        {
            tracing::debug!(old = %previous.id(), new = %session.id(), %kind, "superseding session");
            previous.cancel();
        }

        self.spawn(&session, valid);
        Ok(session.id())
    }

    fn spawn(&self, session: &ProbeSession, request: ValidRequest) {
        let family = self.config.address_family;
        match request {
            ValidRequest::Ping {
                target,
                count,
                timeout,
            } => {
                let plan = PingPlan {
                    target,
                    count,
                    timeout,
                    interval: self.config.ping_interval,
                    family,
                };
                let payload_size = self.config.payload_size;
                session.spawn(&self.runtime, move |ctx| async move {
                    let mut transport = IcmpTransport::new(payload_size);
                    ping::run(&ctx, &plan, &mut transport, &SystemResolver).await
                });
            }
            ValidRequest::Traceroute {
                target,
                max_hops,
                timeout,
            } => {
                let plan = TracePlan {
                    target,
                    max_hops,
                    timeout,
                    family,
                };
                let rdns = self.rdns.clone();
                session.spawn(&self.runtime, move |ctx| async move {
                    let mut transport =
                        IcmpTransport::new(TRACE_PAYLOAD_SIZE).with_dont_fragment(true);
                    traceroute::run(&ctx, &plan, &mut transport, rdns.as_deref()).await
                });
            }
            ValidRequest::PortScan {
                target,
                ports,
                timeout,
            } => {
                let plan = ScanPlan {
                    target,
                    ports,
                    timeout,
                    concurrency: self.config.scan_concurrency,
                    family,
                };
                session.spawn(&self.runtime, move |ctx| async move {
                    portscan::run(&ctx, &plan).await
                });
            }
            ValidRequest::Dns(query) => {
                let resolver = self.dns.clone();
                session.spawn(&self.runtime, move |ctx| async move {
                    dns::run(&ctx, &resolver, &query).await
                });
            }
            ValidRequest::Http(url) => {
                let client = self.http.clone();
                session.spawn(&self.runtime, move |ctx| async move {
                    http::run(&ctx, &client, &url).await
                });
            }
        }
    }

    /// Request cancellation of a session. Returns false if the id is unknown
    /// or the session already finished.
    pub fn cancel(&self, id: SessionId) -> bool {
        match self.session(id) {
            Some(session) if !session.is_finished() => {
                session.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel every running session
    pub fn cancel_all(&self) {
        for session in self.active.lock().values() {
            session.cancel();
        }
    }

    /// The latest session of its kind with this id, if still tracked
    pub fn session(&self, id: SessionId) -> Option<ProbeSession> {
        self.active
            .lock()
            .values()
            .find(|s| s.id() == id)
            .cloned()
    }
}

impl Drop for ProbeEngine {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
