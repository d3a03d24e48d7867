//! Notification permission negotiation.
//!
//! The host permission primitive is consulted at most once per process:
//! the first resolver queries [`PermissionGate::is_granted`], asks via
//! [`PermissionGate::request`] when needed, and caches the answer.
//! Concurrent resolvers wait on the same in-flight resolution. The answer is
//! mirrored into a plain mutex so readers never wait on an in-flight
//! resolution to see it.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Answer from the host permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Granted,
    Denied,
}

/// Cached permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    /// Not resolved yet.
    #[default]
    Unknown,
    Granted,
    /// Terminal for the session: all scheduling is discarded.
    Denied,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Granted => "granted",
            Self::Denied => "denied",
        };
        f.write_str(s)
    }
}

impl From<PermissionDecision> for PermissionState {
    fn from(decision: PermissionDecision) -> Self {
        match decision {
            PermissionDecision::Granted => Self::Granted,
            PermissionDecision::Denied => Self::Denied,
        }
    }
}

/// Host notification-permission primitive.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Whether permission is already granted, without prompting.
    async fn is_granted(&self) -> bool;

    /// Prompt the user for permission.
    async fn request(&self) -> PermissionDecision;
}

/// Gate with a fixed answer, for hosts without a permission model and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermissionGate {
    decision: PermissionDecision,
}

impl StaticPermissionGate {
    /// Gate that always grants.
    pub fn granted() -> Self {
        Self {
            decision: PermissionDecision::Granted,
        }
    }

    /// Gate that always denies.
    pub fn denied() -> Self {
        Self {
            decision: PermissionDecision::Denied,
        }
    }
}

#[async_trait]
impl PermissionGate for StaticPermissionGate {
    async fn is_granted(&self) -> bool {
        self.decision == PermissionDecision::Granted
    }

    async fn request(&self) -> PermissionDecision {
        self.decision
    }
}

/// Single-flight resolver that caches the gate's answer.
pub(crate) struct PermissionNegotiator {
    gate: Arc<dyn PermissionGate>,
    /// Held across the gate calls; serialises resolution.
    state: Mutex<PermissionState>,
    /// Last resolved answer, readable without touching the async mutex.
    resolved: StdMutex<PermissionState>,
    denial_logged: AtomicBool,
}

impl PermissionNegotiator {
    pub(crate) fn new(gate: Arc<dyn PermissionGate>) -> Self {
        Self {
            gate,
            state: Mutex::new(PermissionState::Unknown),
            resolved: StdMutex::new(PermissionState::Unknown),
            denial_logged: AtomicBool::new(false),
        }
    }

    /// Resolve the permission state, consulting the gate only from `Unknown`.
    ///
    /// The async mutex is held across the gate calls, so callers arriving
    /// mid-resolution wait and then observe the cached answer.
    pub(crate) async fn resolve(&self) -> PermissionState {
        let cached = self.cached();
        if cached != PermissionState::Unknown {
            return cached;
        }

        let mut state = self.state.lock().await;
        if *state != PermissionState::Unknown {
            return *state;
        }

        let resolved = if self.gate.is_granted().await {
            PermissionState::Granted
        } else {
            debug!("notification permission not granted yet, requesting");
            PermissionState::from(self.gate.request().await)
        };
        *state = resolved;
        self.store_resolved(resolved);

        match resolved {
            PermissionState::Granted => info!("notification permission granted"),
            PermissionState::Denied => {
                if !self.denial_logged.swap(true, Ordering::SeqCst) {
                    warn!("notification permission denied; reminders disabled for this session");
                }
            }
            PermissionState::Unknown => {}
        }
        resolved
    }

    /// Cached state without waiting; `Unknown` until the first resolution
    /// completes.
    pub(crate) fn cached(&self) -> PermissionState {
        *self.resolved.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store_resolved(&self, state: PermissionState) {
        *self.resolved.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Forget the cached answer so the next resolution consults the gate again.
    pub(crate) async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = PermissionState::Unknown;
        self.store_resolved(PermissionState::Unknown);
        self.denial_logged.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingGate {
        already_granted: bool,
        answer: PermissionDecision,
        queries: AtomicUsize,
        requests: AtomicUsize,
        delay: Duration,
    }

    impl CountingGate {
        fn new(already_granted: bool, answer: PermissionDecision) -> Arc<Self> {
            Arc::new(Self {
                already_granted,
                answer,
                queries: AtomicUsize::new(0),
                requests: AtomicUsize::new(0),
                delay: Duration::from_millis(20),
            })
        }
    }

    #[async_trait]
    impl PermissionGate for CountingGate {
        async fn is_granted(&self) -> bool {
            self.queries.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.already_granted
        }

        async fn request(&self) -> PermissionDecision {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[tokio::test]
    async fn already_granted_skips_request() {
        let gate = CountingGate::new(true, PermissionDecision::Denied);
        let negotiator = PermissionNegotiator::new(gate.clone());

        assert_eq!(negotiator.resolve().await, PermissionState::Granted);
        assert_eq!(gate.queries.load(Ordering::SeqCst), 1);
        assert_eq!(gate.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn request_answer_is_cached() {
        let gate = CountingGate::new(false, PermissionDecision::Granted);
        let negotiator = PermissionNegotiator::new(gate.clone());

        assert_eq!(negotiator.cached(), PermissionState::Unknown);
        assert_eq!(negotiator.resolve().await, PermissionState::Granted);
        assert_eq!(negotiator.resolve().await, PermissionState::Granted);
        assert_eq!(negotiator.cached(), PermissionState::Granted);
        assert_eq!(gate.queries.load(Ordering::SeqCst), 1);
        assert_eq!(gate.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_resolvers_share_one_query() {
        let gate = CountingGate::new(false, PermissionDecision::Denied);
        let negotiator = Arc::new(PermissionNegotiator::new(gate.clone()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let negotiator = Arc::clone(&negotiator);
            handles.push(tokio::spawn(async move { negotiator.resolve().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.expect("join"), PermissionState::Denied);
        }
        assert_eq!(gate.queries.load(Ordering::SeqCst), 1);
        assert_eq!(gate.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denial_is_terminal_and_logged_once() {
        let gate = CountingGate::new(false, PermissionDecision::Denied);
        let negotiator = PermissionNegotiator::new(gate.clone());

        assert_eq!(negotiator.resolve().await, PermissionState::Denied);
        assert!(negotiator.denial_logged.load(Ordering::SeqCst));
        assert_eq!(negotiator.resolve().await, PermissionState::Denied);
        assert_eq!(negotiator.cached(), PermissionState::Denied);
        assert_eq!(gate.queries.load(Ordering::SeqCst), 1);
        assert_eq!(gate.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cached_answer_is_visible_while_others_resolve() {
        let gate = CountingGate::new(true, PermissionDecision::Denied);
        let negotiator = Arc::new(PermissionNegotiator::new(gate.clone()));
        assert_eq!(negotiator.resolve().await, PermissionState::Granted);

        let stop = Arc::new(AtomicBool::new(false));
        let resolver = {
            let negotiator = Arc::clone(&negotiator);
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                while !stop.load(Ordering::SeqCst) {
                    negotiator.resolve().await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut unknown_reads = 0;
        for _ in 0..20_000 {
            if negotiator.cached() != PermissionState::Granted {
                unknown_reads += 1;
            }
            tokio::task::yield_now().await;
        }
        stop.store(true, Ordering::SeqCst);
        resolver.await.expect("join");

        assert_eq!(unknown_reads, 0);
        assert_eq!(gate.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_consults_gate_again() {
        let gate = CountingGate::new(false, PermissionDecision::Denied);
        let negotiator = PermissionNegotiator::new(gate.clone());

        assert_eq!(negotiator.resolve().await, PermissionState::Denied);
        negotiator.reset().await;
        assert_eq!(negotiator.cached(), PermissionState::Unknown);
        assert_eq!(negotiator.resolve().await, PermissionState::Denied);
        assert_eq!(gate.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn static_gate_answers() {
        assert!(StaticPermissionGate::granted().is_granted().await);
        assert!(!StaticPermissionGate::denied().is_granted().await);
        assert_eq!(
            StaticPermissionGate::denied().request().await,
            PermissionDecision::Denied
        );
    }
}
