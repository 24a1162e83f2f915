//! Typed order lifecycle events.
//!
//! Event names returned by [`OrderEvent::name`] are contractual: downstream
//! consumers and tests match on them.

use crate::domain::OrderStatus;
use crate::oms::state::OrderRecord;

/// Why an order was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicit `cancel_order` call
    User,
    /// Venue-side cancellation (FOK failure, FAK residual, self-trade, ...)
    System,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::User => write!(f, "user"),
            CancelReason::System => write!(f, "system"),
        }
    }
}

/// A materialized fill credited to an order
#[derive(Debug, Clone)]
pub struct FillEvent {
    /// Venue trade id, or a synthetic id for polling-detected fills
    pub trade_id: String,
    pub size: f64,
    pub price: f64,
    /// Order's filled size after this fill
    pub cumulative_filled: f64,
    pub is_complete_fill: bool,
    pub tx_hash: Option<String>,
}

/// Order lifecycle event stream payload
#[derive(Debug, Clone)]
pub enum OrderEvent {
    /// Order accepted by the venue and now supervised
    Created { order: OrderRecord },
    /// Order resting on the book
    Opened { order: OrderRecord },
    /// Partial fill credited
    PartiallyFilled { order: OrderRecord, fill: FillEvent },
    /// Order complete. `fill` is None when the completing fill was already
    /// emitted by another source.
    Filled {
        order: OrderRecord,
        fill: Option<FillEvent>,
    },
    Cancelled {
        order: OrderRecord,
        reason: CancelReason,
        /// Size left unfilled at cancellation
        cancelled_size: f64,
    },
    Expired { order: OrderRecord },
    /// Validation or venue rejection; the order never reached the book
    Rejected {
        order: Option<OrderRecord>,
        reason: String,
    },
    /// Every status transition, including those covered by a typed event
    StatusChange {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },
    /// A trade reported an on-chain transaction hash
    TransactionSubmitted {
        order_id: String,
        trade_id: String,
        tx_hash: String,
    },
    /// The trade's transaction reached one confirmation
    TransactionConfirmed {
        order_id: String,
        trade_id: String,
        tx_hash: String,
        block_number: u64,
        gas_used: u64,
    },
    /// Non-fatal engine error (invalid transition, settlement failure, ...)
    Error {
        order_id: Option<String>,
        message: String,
    },
}

impl OrderEvent {
    /// Stable wire name of this event
    pub fn name(&self) -> &'static str {
        match self {
            OrderEvent::Created { .. } => "order_created",
            OrderEvent::Opened { .. } => "order_opened",
            OrderEvent::PartiallyFilled { .. } => "order_partially_filled",
            OrderEvent::Filled { .. } => "order_filled",
            OrderEvent::Cancelled { .. } => "order_cancelled",
            OrderEvent::Expired { .. } => "order_expired",
            OrderEvent::Rejected { .. } => "order_rejected",
            OrderEvent::StatusChange { .. } => "status_change",
            OrderEvent::TransactionSubmitted { .. } => "transaction_submitted",
            OrderEvent::TransactionConfirmed { .. } => "transaction_confirmed",
            OrderEvent::Error { .. } => "error",
        }
    }

    /// Order id this event concerns, when known
    pub fn order_id(&self) -> Option<&str> {
        match self {
            OrderEvent::Created { order }
            | OrderEvent::Opened { order }
            | OrderEvent::PartiallyFilled { order, .. }
            | OrderEvent::Filled { order, .. }
            | OrderEvent::Cancelled { order, .. }
            | OrderEvent::Expired { order } => Some(&order.order_id),
            OrderEvent::Rejected { order, .. } => order.as_ref().map(|o| o.order_id.as_str()),
            OrderEvent::StatusChange { order_id, .. }
            | OrderEvent::TransactionSubmitted { order_id, .. }
            | OrderEvent::TransactionConfirmed { order_id, .. } => Some(order_id),
            OrderEvent::Error { order_id, .. } => order_id.as_deref(),
        }
    }

    /// True when this event marks a terminal order state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderEvent::Filled { .. }
                | OrderEvent::Cancelled { .. }
                | OrderEvent::Expired { .. }
                | OrderEvent::Rejected { .. }
        )
    }
}
