// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cancellation signals and the upstream fan-in aggregator.
//!
//! Cancellation propagates top-down from a single root (an HTTP request, an
//! explicit user cancel) through nested calls. A timeout is not a separate
//! primitive, it is a cancellation source that fires on its own after a
//! deadline. There is no upward cancellation: a child can never cancel its
//! parent.

use std::sync::{Arc, Weak};
use std::time::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

/// Why a signal fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    ClientDisconnected,
    UserCancelled,
    ParentCancelled,
    DeadlineExceeded,
    Manual(String),
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::ClientDisconnected => write!(f, "client disconnected"),
            CancelReason::UserCancelled => write!(f, "cancelled by user"),
            CancelReason::ParentCancelled => write!(f, "parent execution cancelled"),
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
            CancelReason::Manual(msg) => write!(f, "{msg}"),
        }
    }
}

type Listener = Box<dyn FnOnce(&CancelReason) + Send>;

struct SignalState {
    cancelled: Option<CancelReason>,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

struct SignalInner {
    state: Mutex<SignalState>,
}

/// One-shot, idempotent cancellation signal.
///
/// Cloning shares the same underlying signal. Listener registration is
/// one-shot: the listener list is drained exactly once when the signal
/// fires, so no listener is ever invoked twice and none linger afterwards.
#[derive(Clone)]
pub struct CancelSignal {
    inner: Arc<SignalInner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                state: Mutex::new(SignalState {
                    cancelled: None,
                    listeners: Vec::new(),
                    next_listener_id: 0,
                }),
            }),
        }
    }

    /// A signal that is already fired.
    pub fn cancelled_with(reason: CancelReason) -> Self {
        let signal = Self::new();
        signal.cancel(reason);
        signal
    }

    /// A degenerate cancellation source that fires on its own after
    /// `deadline`. The timer task keeps the signal alive until it fires.
    pub fn deadline(deadline: Duration) -> Self {
        let signal = Self::new();
        let timer = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            timer.cancel(CancelReason::DeadlineExceeded);
        });
        signal
    }

    /// Fire the signal. Returns `true` on the first call only; later calls
    /// are no-ops and the original reason is kept.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.cancelled.is_some() {
                return false;
            }
            state.cancelled = Some(reason.clone());
            std::mem::take(&mut state.listeners)
        };
        // Listeners run outside the lock; the fired flag is already set, so
        // a re-entrant cancel() from inside a listener is a no-op.
        debug!(listeners = drained.len(), %reason, "Cancel signal fired");
        for (_, listener) in drained {
            listener(&reason);
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled.is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.state.lock().cancelled.clone()
    }

    /// Register a one-shot listener. If the signal already fired, the
    /// listener is invoked immediately and previously fired listeners are
    /// not re-run. The returned guard deregisters the listener when dropped.
    pub fn on_cancel<F>(&self, listener: F) -> ListenerGuard
    where
        F: FnOnce(&CancelReason) + Send + 'static,
    {
        let id = {
            let mut state = self.inner.state.lock();
            match &state.cancelled {
                Some(reason) => {
                    let reason = reason.clone();
                    drop(state);
                    listener(&reason);
                    return ListenerGuard { inner: Weak::new(), id: 0 };
                }
                None => {
                    let id = state.next_listener_id;
                    state.next_listener_id += 1;
                    state.listeners.push((id, Box::new(listener)));
                    id
                }
            }
        };
        ListenerGuard {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Completes when the signal fires. Usable inside `tokio::select!`.
    pub async fn cancelled(&self) -> CancelReason {
        let (tx, rx) = oneshot::channel();
        let _guard = self.on_cancel(move |reason| {
            let _ = tx.send(reason.clone());
        });
        rx.await.unwrap_or(CancelReason::Manual("signal dropped".to_string()))
    }

    /// Live listener registrations, for leak checks.
    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.reason())
            .finish()
    }
}

/// Deregisters its listener on drop. Dropping after the signal fired is a
/// no-op, the listener list was already drained.
pub struct ListenerGuard {
    inner: Weak<SignalInner>,
    id: u64,
}

impl ListenerGuard {
    /// Leave the listener registered for the signal's whole lifetime.
    pub fn detach(mut self) {
        self.inner = Weak::new();
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut state = inner.state.lock();
            state.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Fans any number of upstream cancel signals into one downstream signal.
///
/// The downstream handle fires exactly once with the first upstream's
/// reason; every listener on every input (fired or not) is released
/// immediately afterwards so long-running execution trees do not leak
/// registrations. Manual cancellation of the downstream handle releases the
/// upstream listeners the same way.
pub struct CancellationScope;

impl CancellationScope {
    pub fn aggregate(upstreams: &[CancelSignal]) -> CancelSignal {
        // Already-cancelled input: downstream is cancelled synchronously
        // before returning and no listener is registered anywhere.
        for upstream in upstreams {
            if let Some(reason) = upstream.reason() {
                return CancelSignal::cancelled_with(reason);
            }
        }

        let downstream = CancelSignal::new();
        if upstreams.is_empty() {
            // Nothing to observe; the handle is independently cancellable.
            return downstream;
        }

        let guards: Arc<Mutex<Vec<ListenerGuard>>> =
            Arc::new(Mutex::new(Vec::with_capacity(upstreams.len())));

        for upstream in upstreams {
            let downstream = downstream.clone();
            let guard = upstream.on_cancel(move |reason| {
                downstream.cancel(reason.clone());
            });
            guards.lock().push(guard);
        }

        // The downstream's own firing (upstream-driven or manual) releases
        // every remaining upstream registration.
        let cleanup = Arc::clone(&guards);
        downstream
            .on_cancel(move |_| {
                cleanup.lock().clear();
            })
            // The cleanup listener lives as long as the downstream signal.
            .detach();

        downstream
    }
}
