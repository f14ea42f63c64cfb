//! Test doubles shared by the engine runners.

use async_trait::async_trait;
use hickory_resolver::proto::op::{Message, MessageType, ResponseCode};
use hickory_resolver::proto::rr::Record;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::error::ProbeError;
use crate::lookup::resolve::{AddressFamily, TargetResolver};
use crate::probe::{EchoOutcome, EchoTransport};
use crate::state::{ProbeKind, ProbeSession, ResultEvent, SessionContext, SessionEvent, SessionState};

/// Plays back a fixed list of outcomes, then times out forever after
pub(crate) struct ScriptedTransport {
    script: VecDeque<anyhow::Result<EchoOutcome>>,
    calls: Arc<AtomicUsize>,
    ttls: Arc<Mutex<Vec<Option<u8>>>>,
    delay: Duration,
    prepare_error: Option<String>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<anyhow::Result<EchoOutcome>>) -> Self {
        Self {
            script: script.into(),
            calls: Arc::new(AtomicUsize::new(0)),
            ttls: Arc::default(),
            delay: Duration::ZERO,
            prepare_error: None,
        }
    }

    /// Make every echo take `delay` before answering
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail `prepare` the way a missing ICMP permission would
    pub(crate) fn with_prepare_error(mut self, message: &str) -> Self {
        self.prepare_error = Some(message.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// TTL passed to each echo, in call order
    pub(crate) fn ttls(&self) -> Arc<Mutex<Vec<Option<u8>>>> {
        self.ttls.clone()
    }
}

#[async_trait]
impl EchoTransport for ScriptedTransport {
    async fn echo(
        &mut self,
        _target: IpAddr,
        ttl: Option<u8>,
        _timeout: Duration,
    ) -> anyhow::Result<EchoOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ttls.lock().push(ttl);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.script.pop_front().unwrap_or(Ok(EchoOutcome::TimedOut))
    }

    async fn prepare(&mut self, _target: IpAddr) -> anyhow::Result<()> {
        match &self.prepare_error {
            Some(message) => Err(anyhow::anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

/// Plays back lookup answers, then resolves everything to loopback
pub(crate) struct ScriptedResolver {
    script: Mutex<VecDeque<Result<IpAddr, ProbeError>>>,
    delay: Duration,
}

impl ScriptedResolver {
    pub(crate) fn new(script: Vec<Result<IpAddr, ProbeError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TargetResolver for ScriptedResolver {
    async fn resolve(&self, _target: &str, _family: AddressFamily) -> Result<IpAddr, ProbeError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or(Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)))
    }
}

pub(crate) fn reply(ms: u64) -> anyhow::Result<EchoOutcome> {
    Ok(EchoOutcome::Reply {
        from: IpAddr::V4(Ipv4Addr::LOCALHOST),
        rtt: Duration::from_millis(ms),
        bytes: 32,
        ttl: Some(64),
    })
}

pub(crate) fn router(last_octet: u8, ms: u64) -> anyhow::Result<EchoOutcome> {
    Ok(EchoOutcome::TimeExceeded {
        from: IpAddr::V4(Ipv4Addr::new(192, 0, 2, last_octet)),
        rtt: Duration::from_millis(ms),
    })
}

pub(crate) fn start<F, Fut>(kind: ProbeKind, probe: F) -> (ProbeSession, UnboundedReceiver<SessionEvent>)
where
    F: FnOnce(SessionContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ProbeError>> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let session = ProbeSession::new(kind, tx);
    session.spawn(&Handle::current(), probe);
    (session, rx)
}

/// Read until the terminal state; returns it with every result event seen
pub(crate) async fn drain(
    rx: &mut UnboundedReceiver<SessionEvent>,
) -> (SessionState, Vec<ResultEvent>) {
    let mut results = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Result { result, .. } => results.push(result),
            SessionEvent::State { state, .. } if state.is_terminal() => return (state, results),
            SessionEvent::State { .. } => {}
        }
    }
    panic!("event channel closed before a terminal state");
}

pub(crate) async fn run_session<F, Fut>(kind: ProbeKind, probe: F) -> (SessionState, Vec<ResultEvent>)
where
    F: FnOnce(SessionContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ProbeError>> + Send + 'static,
{
    let (_session, mut rx) = start(kind, probe);
    drain(&mut rx).await
}

pub(crate) fn collect<T>(results: &[ResultEvent], f: impl Fn(&ResultEvent) -> Option<T>) -> Vec<T> {
    results.iter().filter_map(f).collect()
}

/// Loopback UDP name server; `answer` builds the response to each query,
/// or returns None to stay silent
pub(crate) async fn dns_responder<F>(answer: F) -> SocketAddr
where
    F: Fn(&Message) -> Option<Message> + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            let Ok(query) = Message::from_vec(&buf[..len]) else {
                continue;
            };
            if let Some(response) = answer(&query)
                && let Ok(bytes) = response.to_vec()
            {
                let _ = socket.send_to(&bytes, peer).await;
            }
        }
    });
    addr
}

pub(crate) fn dns_response(query: &Message, code: ResponseCode, answers: Vec<Record>) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(code)
        .add_queries(query.queries().to_vec())
        .add_answers(answers);
    response
}
