//! Fluent, awaitable per-order lifecycle handle.
//!
//! A handle observes the manager's broadcast stream filtered by its order
//! id. Callbacks registered through the six `on_*` methods run under a
//! panic fence so user code can never corrupt lifecycle processing, and the
//! handle resolves exactly once with a terminal [`OrderOutcome`].

use crate::oms::events::{FillEvent, OrderEvent};
use crate::oms::state::OrderRecord;
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

/// Terminal disposition of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

/// Final result a handle resolves with, exactly once
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub status: OutcomeStatus,
    pub order: OrderRecord,
    pub fills: Vec<FillEvent>,
    pub reason: Option<String>,
}

type AcceptedCb = Arc<dyn Fn(&OrderRecord) + Send + Sync>;
type PartialCb = Arc<dyn Fn(&OrderRecord, &FillEvent) + Send + Sync>;
type FilledCb = Arc<dyn Fn(&OrderRecord) + Send + Sync>;
type RejectedCb = Arc<dyn Fn(&str) + Send + Sync>;
type CancelledCb = Arc<dyn Fn(&OrderRecord) + Send + Sync>;
type ExpiredCb = Arc<dyn Fn(&OrderRecord) + Send + Sync>;
pub(crate) type CancelFn = Arc<dyn Fn(&str) + Send + Sync>;

/// State shared between the handle and its driver task.
///
/// `resolved` doubles as the synchronization point: registrars check it
/// before appending, and the driver sets it before draining the callback
/// lists, both under its lock, so a callback is either fired retroactively
/// by the registrar or drained and fired by the driver — never both.
pub(crate) struct HandleShared {
    pub(crate) order_id: RwLock<Option<String>>,
    resolved: Mutex<Option<OrderOutcome>>,
    accepted: Mutex<Vec<AcceptedCb>>,
    partial: Mutex<Vec<PartialCb>>,
    filled: Mutex<Vec<FilledCb>>,
    rejected: Mutex<Vec<RejectedCb>>,
    cancelled: Mutex<Vec<CancelledCb>>,
    expired: Mutex<Vec<ExpiredCb>>,
}

impl HandleShared {
    fn new() -> Self {
        Self {
            order_id: RwLock::new(None),
            resolved: Mutex::new(None),
            accepted: Mutex::new(Vec::new()),
            partial: Mutex::new(Vec::new()),
            filled: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            expired: Mutex::new(Vec::new()),
        }
    }
}

/// Run a user callback under a panic fence.
fn fenced<F: FnOnce()>(f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("order lifecycle callback panicked, swallowed");
    }
}

/// Awaitable handle for one order.
pub struct OrderHandle {
    shared: Arc<HandleShared>,
    outcome_rx: Mutex<Option<oneshot::Receiver<OrderOutcome>>>,
    cancel_fn: CancelFn,
}

impl OrderHandle {
    /// Handle for an order in flight; the manager wires the driver.
    pub(crate) fn pending(
        cancel_fn: CancelFn,
    ) -> (Self, Arc<HandleShared>, oneshot::Sender<OrderOutcome>) {
        let shared = Arc::new(HandleShared::new());
        let (outcome_tx, outcome_rx) = oneshot::channel();
        (
            Self {
                shared: Arc::clone(&shared),
                outcome_rx: Mutex::new(Some(outcome_rx)),
                cancel_fn,
            },
            shared,
            outcome_tx,
        )
    }

    /// Handle that is already terminally rejected (validation or venue
    /// refusal); no driver exists.
    pub(crate) fn rejected_now(order: OrderRecord, reason: String) -> Self {
        let shared = Arc::new(HandleShared::new());
        *shared.resolved.lock() = Some(OrderOutcome {
            status: OutcomeStatus::Rejected,
            order,
            fills: Vec::new(),
            reason: Some(reason),
        });
        Self {
            shared,
            outcome_rx: Mutex::new(None),
            cancel_fn: Arc::new(|_| {}),
        }
    }

    /// Server-assigned order id, once known
    pub fn order_id(&self) -> Option<String> {
        self.shared.order_id.read().clone()
    }

    /// Request cancellation. No-ops when no order id is known yet or the
    /// handle already resolved.
    pub fn cancel(&self) {
        if self.shared.resolved.lock().is_some() {
            return;
        }
        if let Some(id) = self.shared.order_id.read().clone() {
            (self.cancel_fn)(&id);
        }
    }

    /// Resolve to the terminal outcome. Returns immediately if already
    /// resolved.
    pub async fn wait(self) -> OrderOutcome {
        if let Some(outcome) = self.shared.resolved.lock().clone() {
            return outcome;
        }
        let rx = self.outcome_rx.lock().take();
        match rx {
            Some(rx) => match rx.await {
                Ok(outcome) => outcome,
                Err(_) => self.fallback_outcome(),
            },
            None => self.fallback_outcome(),
        }
    }

    fn fallback_outcome(&self) -> OrderOutcome {
        self.shared.resolved.lock().clone().unwrap_or(OrderOutcome {
            status: OutcomeStatus::Rejected,
            order: OrderRecord::unknown(self.order_id().unwrap_or_default()),
            fills: Vec::new(),
            reason: Some("event stream closed before resolution".to_string()),
        })
    }

    // =========================================================================
    // Chainable lifecycle callbacks
    // =========================================================================

    pub fn on_accepted(self, f: impl Fn(&OrderRecord) + Send + Sync + 'static) -> Self {
        let resolved = self.shared.resolved.lock();
        if resolved.is_none() {
            self.shared.accepted.lock().push(Arc::new(f));
        }
        drop(resolved);
        self
    }

    pub fn on_partial_fill(
        self,
        f: impl Fn(&OrderRecord, &FillEvent) + Send + Sync + 'static,
    ) -> Self {
        let resolved = self.shared.resolved.lock();
        if let Some(outcome) = &*resolved {
            // Fire retroactively for fills that happened before registration
            for fill in &outcome.fills {
                if !fill.is_complete_fill {
                    fenced(|| f(&outcome.order, fill));
                }
            }
        } else {
            self.shared.partial.lock().push(Arc::new(f));
        }
        drop(resolved);
        self
    }

    pub fn on_filled(self, f: impl Fn(&OrderRecord) + Send + Sync + 'static) -> Self {
        let resolved = self.shared.resolved.lock();
        match &*resolved {
            Some(outcome) if outcome.status == OutcomeStatus::Filled => {
                fenced(|| f(&outcome.order));
            }
            Some(_) => {}
            None => self.shared.filled.lock().push(Arc::new(f)),
        }
        drop(resolved);
        self
    }

    pub fn on_rejected(self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        let resolved = self.shared.resolved.lock();
        match &*resolved {
            Some(outcome) if outcome.status == OutcomeStatus::Rejected => {
                let reason = outcome.reason.clone().unwrap_or_default();
                fenced(|| f(&reason));
            }
            Some(_) => {}
            None => self.shared.rejected.lock().push(Arc::new(f)),
        }
        drop(resolved);
        self
    }

    pub fn on_cancelled(self, f: impl Fn(&OrderRecord) + Send + Sync + 'static) -> Self {
        let resolved = self.shared.resolved.lock();
        match &*resolved {
            Some(outcome) if outcome.status == OutcomeStatus::Cancelled => {
                fenced(|| f(&outcome.order));
            }
            Some(_) => {}
            None => self.shared.cancelled.lock().push(Arc::new(f)),
        }
        drop(resolved);
        self
    }

    pub fn on_expired(self, f: impl Fn(&OrderRecord) + Send + Sync + 'static) -> Self {
        let resolved = self.shared.resolved.lock();
        match &*resolved {
            Some(outcome) if outcome.status == OutcomeStatus::Expired => {
                fenced(|| f(&outcome.order));
            }
            Some(_) => {}
            None => self.shared.expired.lock().push(Arc::new(f)),
        }
        drop(resolved);
        self
    }
}

/// Drive a handle from the manager's broadcast stream.
///
/// Filters by order id, fires callbacks under the panic fence, resolves the
/// outcome exactly once, and unsubscribes (drops the receiver) afterwards.
pub(crate) fn spawn_driver(
    shared: Arc<HandleShared>,
    order_id: String,
    mut rx: broadcast::Receiver<OrderEvent>,
    outcome_tx: oneshot::Sender<OrderOutcome>,
) {
    tokio::spawn(async move {
        let mut fills: Vec<FillEvent> = Vec::new();

        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(order_id = %order_id, "handle driver lagged by {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(order_id = %order_id, "event stream closed before resolution");
                    return;
                }
            };

            if event.order_id() != Some(order_id.as_str()) {
                continue;
            }

            let outcome = match event {
                OrderEvent::Created { order } => {
                    let cbs: Vec<AcceptedCb> = shared.accepted.lock().clone();
                    for cb in cbs {
                        fenced(|| cb(&order));
                    }
                    None
                }
                OrderEvent::PartiallyFilled { order, fill } => {
                    fills.push(fill.clone());
                    let cbs: Vec<PartialCb> = shared.partial.lock().clone();
                    for cb in cbs {
                        fenced(|| cb(&order, &fill));
                    }
                    None
                }
                OrderEvent::Filled { order, fill } => {
                    if let Some(fill) = fill {
                        fills.push(fill);
                    }
                    Some(OrderOutcome {
                        status: OutcomeStatus::Filled,
                        order,
                        fills: fills.clone(),
                        reason: None,
                    })
                }
                OrderEvent::Cancelled { order, reason, .. } => Some(OrderOutcome {
                    status: OutcomeStatus::Cancelled,
                    order,
                    fills: fills.clone(),
                    reason: Some(reason.to_string()),
                }),
                OrderEvent::Expired { order } => Some(OrderOutcome {
                    status: OutcomeStatus::Expired,
                    order,
                    fills: fills.clone(),
                    reason: None,
                }),
                OrderEvent::Rejected { order, reason } => Some(OrderOutcome {
                    status: OutcomeStatus::Rejected,
                    order: order.unwrap_or_else(|| OrderRecord::unknown(order_id.clone())),
                    fills: fills.clone(),
                    reason: Some(reason),
                }),
                _ => None,
            };

            if let Some(outcome) = outcome {
                // Set the resolution, then drain the terminal callbacks:
                // the resolved lock sequences this against late registrars,
                // which fire retroactively once they see the outcome
                let drained = {
                    let mut resolved = shared.resolved.lock();
                    *resolved = Some(outcome.clone());
                    match outcome.status {
                        OutcomeStatus::Filled => {
                            TerminalCbs::Filled(std::mem::take(&mut *shared.filled.lock()))
                        }
                        OutcomeStatus::Cancelled => {
                            TerminalCbs::Cancelled(std::mem::take(&mut *shared.cancelled.lock()))
                        }
                        OutcomeStatus::Expired => {
                            TerminalCbs::Expired(std::mem::take(&mut *shared.expired.lock()))
                        }
                        OutcomeStatus::Rejected => {
                            TerminalCbs::Rejected(std::mem::take(&mut *shared.rejected.lock()))
                        }
                    }
                };

                match drained {
                    TerminalCbs::Filled(cbs) => {
                        for cb in cbs {
                            fenced(|| cb(&outcome.order));
                        }
                    }
                    TerminalCbs::Cancelled(cbs) => {
                        for cb in cbs {
                            fenced(|| cb(&outcome.order));
                        }
                    }
                    TerminalCbs::Expired(cbs) => {
                        for cb in cbs {
                            fenced(|| cb(&outcome.order));
                        }
                    }
                    TerminalCbs::Rejected(cbs) => {
                        let reason = outcome.reason.clone().unwrap_or_default();
                        for cb in cbs {
                            fenced(|| cb(&reason));
                        }
                    }
                }

                // Dropping the receiver unsubscribes from the stream
                let _ = outcome_tx.send(outcome);
                return;
            }
        }
    });
}

enum TerminalCbs {
    Filled(Vec<FilledCb>),
    Cancelled(Vec<CancelledCb>),
    Expired(Vec<ExpiredCb>),
    Rejected(Vec<RejectedCb>),
}
