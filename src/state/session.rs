use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::event::{ResultEvent, SessionEvent};
use crate::error::ProbeError;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one run of a probe
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Probe type; at most one session per kind is active at a time
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Ping,
    Traceroute,
    PortScan,
    Dns,
    Http,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeKind::Ping => "ping",
            ProbeKind::Traceroute => "traceroute",
            ProbeKind::PortScan => "port scan",
            ProbeKind::Dns => "dns",
            ProbeKind::Http => "http",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_advance_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Running) => true,
            (Running, Cancelling) => true,
            (Running | Cancelling, Completed | Failed | Cancelled) => true,
            // Cancelled before the task got a chance to run
            (Idle, Cancelled) => true,
            _ => false,
        }
    }
}

/// State shared between a session handle and its running task
struct Shared {
    id: SessionId,
    kind: ProbeKind,
    // Guards both the state and event emission so nothing slips out after
    // the terminal transition
    state: Mutex<SessionState>,
    events: UnboundedSender<SessionEvent>,
}

impl Shared {
    fn send(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(session = %self.id, "event receiver dropped");
        }
    }

    /// Transition and publish the new state, holding the lock
    fn advance(&self, state: &mut SessionState, next: SessionState) -> bool {
        if !state.can_advance_to(next) {
            return false;
        }
        *state = next;
        self.send(SessionEvent::State {
            session: self.id,
            kind: self.kind,
            state: next,
        });
        true
    }

    fn emit(&self, result: ResultEvent) {
        let state = self.state.lock();
        if state.is_terminal() {
            tracing::debug!(session = %self.id, "dropping event after terminal state");
            return;
        }
        self.send(SessionEvent::Result {
            session: self.id,
            result,
        });
    }

    /// Publish the terminal events; only the first call has any effect
    fn finish(&self, outcome: Result<(), ProbeError>) {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return;
        }

        let terminal = match &outcome {
            Ok(()) => SessionState::Completed,
            Err(ProbeError::Cancelled) => SessionState::Cancelled,
            Err(err) => {
                self.send(SessionEvent::Result {
                    session: self.id,
                    result: ResultEvent::Error {
                        kind: err.kind(),
                        message: err.to_string(),
                    },
                });
                SessionState::Failed
            }
        };

        self.send(SessionEvent::Result {
            session: self.id,
            result: ResultEvent::Done,
        });
        self.advance(&mut state, terminal);
        tracing::debug!(session = %self.id, kind = %self.kind, state = ?terminal, "session finished");
    }
}

/// Handle to a probe session: identity, state and its cancellation signal
#[derive(Clone)]
pub struct ProbeSession {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl fmt::Debug for ProbeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeSession")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl ProbeSession {
    /// Create an idle session publishing into `events`
    pub fn new(kind: ProbeKind, events: UnboundedSender<SessionEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: SessionId::next(),
                kind,
                state: Mutex::new(SessionState::Idle),
                events,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn kind(&self) -> ProbeKind {
        self.shared.kind
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == SessionState::Running {
                self.shared.advance(&mut state, SessionState::Cancelling);
            }
        }
        self.cancel.cancel();
    }

    /// Run `probe` on `runtime`, publishing `Running` first and exactly one
    /// terminal state last.
    ///
    /// The probe runs in its own task so a panic is observed as a `JoinError`
    /// and turned into an `Unexpected` failure instead of a silent stall.
    pub fn spawn<F, Fut>(&self, runtime: &Handle, probe: F)
    where
        F: FnOnce(SessionContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ProbeError>> + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if !self.shared.advance(&mut state, SessionState::Running) {
                return;
            }
        }

        let ctx = SessionContext {
            shared: self.shared.clone(),
            cancel: self.cancel.clone(),
        };
        let shared = self.shared.clone();
        let inner = runtime.spawn(probe(ctx));

        runtime.spawn(async move {
            let outcome = match inner.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    let panic = e.into_panic();
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "probe task panicked".to_string());
                    tracing::error!(session = %shared.id, "probe panicked: {message}");
                    Err(ProbeError::Unexpected(message))
                }
                Err(_) => Err(ProbeError::Cancelled),
            };
            shared.finish(outcome);
        });
    }
}

/// What a running probe sees of its session
#[derive(Clone)]
pub struct SessionContext {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl SessionContext {
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn emit(&self, result: ResultEvent) {
        self.shared.emit(result);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.emit(ResultEvent::Info(text.into()));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Race `fut` against the cancellation signal
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, ProbeError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProbeError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Cancellable delay
    pub async fn sleep(&self, duration: Duration) -> Result<(), ProbeError> {
        self.guard(tokio::time::sleep(duration)).await
    }
}
