//! Per-order state machine.
//!
//! Three asynchronous sources feed each order — the user WebSocket channel,
//! REST polling, and on-chain settlement — and the machine must converge to
//! the same outcome from any arrival order. All mutations funnel through
//! here; fills are keyed by the post-fill size so whichever source observes
//! a progression first wins and later arrivals are no-ops.

use crate::domain::{OrderKind, OrderStatus, Side, TradeStatus};
use crate::oms::events::{CancelReason, FillEvent, OrderEvent};
use crate::venue::RestOrder;
use crate::wire::{UserOrderKind, UserOrderMsg, UserTradeMsg};
use std::collections::HashSet;
use tracing::{debug, warn};

const SIZE_EPS: f64 = 1e-9;

// =============================================================================
// Order Record
// =============================================================================

/// Engine-side order snapshot
///
/// For limit orders `filled_size + remaining_size == original_size` holds
/// after every event. For market FOK/FAK orders `original_size` is a
/// quote-currency amount while `filled_size` counts shares; completion is
/// detected by status or `remaining_size <= 0`, never by subtraction.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_id: String,
    pub token_id: String,
    pub side: Side,
    pub price: f64,
    pub original_size: f64,
    pub filled_size: f64,
    pub remaining_size: f64,
    pub kind: OrderKind,
    /// GTD only: expiration, epoch seconds
    pub expiration: Option<i64>,
    pub status: OrderStatus,
    pub updated_at_ms: i64,
    /// Associated trade ids, in arrival order
    pub trade_ids: Vec<String>,
}

impl OrderRecord {
    pub fn new(
        order_id: String,
        token_id: String,
        side: Side,
        price: f64,
        original_size: f64,
        kind: OrderKind,
        expiration: Option<i64>,
    ) -> Self {
        Self {
            order_id,
            token_id,
            side,
            price,
            original_size,
            filled_size: 0.0,
            remaining_size: original_size,
            kind,
            expiration,
            status: OrderStatus::Pending,
            updated_at_ms: 0,
            trade_ids: Vec::new(),
        }
    }

    /// Placeholder record for orders watched without creation context;
    /// sizes are adopted from the first observation.
    pub fn unknown(order_id: String) -> Self {
        Self::new(
            order_id,
            String::new(),
            Side::Buy,
            0.0,
            0.0,
            OrderKind::GTC,
            None,
        )
    }
}

// =============================================================================
// Transition table
// =============================================================================

fn transition_valid(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Open)
            | (Pending, PartiallyFilled)
            | (Pending, Filled)
            | (Pending, Cancelled)
            | (Pending, Rejected)
            | (Open, PartiallyFilled)
            | (Open, Filled)
            | (Open, Cancelled)
            | (Open, Expired)
            | (PartiallyFilled, Filled)
            | (PartiallyFilled, Cancelled)
    )
}

// =============================================================================
// Order State
// =============================================================================

/// Authoritative per-order state plus dedup bookkeeping.
pub struct OrderState {
    pub order: OrderRecord,
    /// Processed-event keys: `order:<id>:<kind>:<ts>`, `trade:<id>:<ts>`,
    /// `fill:<post-filled-size>`, `txsub:<trade-id>`
    processed: HashSet<String>,
    cancel_requested: bool,
}

impl OrderState {
    pub fn new(order: OrderRecord) -> Self {
        Self {
            order,
            processed: HashSet::new(),
            cancel_requested: false,
        }
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    fn fill_key(post_filled: f64) -> String {
        format!("fill:{:.6}", post_filled)
    }

    // =========================================================================
    // Fill accounting
    // =========================================================================

    /// Advance `filled_size` to an absolute value reported by the venue.
    ///
    /// Returns the fill event to emit (None when this progression was
    /// already emitted by another source) and whether the order is now
    /// complete.
    fn credit_to(
        &mut self,
        post_filled: f64,
        price: f64,
        trade_id: Option<&str>,
        tx_hash: Option<String>,
        reported_status: Option<OrderStatus>,
        ts_ms: i64,
    ) -> (Option<FillEvent>, bool) {
        // Terminal orders accept no further fill credit
        if self.order.status.is_terminal() {
            return (None, self.complete_now(reported_status));
        }

        let pre = self.order.filled_size;
        if post_filled <= pre + SIZE_EPS {
            return (None, self.complete_now(reported_status));
        }

        let delta = post_filled - pre;
        let post_remaining = if self.order.kind.is_market() {
            // Quote-denominated budget: spend delta shares at the trade price
            self.order.remaining_size - delta * price
        } else {
            (self.order.original_size - post_filled).max(0.0)
        };

        // Market kinds carry a quote-currency original_size while fills
        // count shares, so the subtraction identity only applies to limit
        // orders; market orders complete via status or an exhausted budget
        let complete = reported_status == Some(OrderStatus::Filled)
            || post_remaining <= SIZE_EPS
            || (!self.order.kind.is_market()
                && pre + delta >= self.order.original_size - SIZE_EPS);

        self.order.filled_size = post_filled;
        self.order.remaining_size = post_remaining;
        self.order.updated_at_ms = ts_ms;

        let key = Self::fill_key(post_filled);
        if self.processed.insert(key) {
            let trade_id = trade_id
                .map(|t| t.to_string())
                .unwrap_or_else(|| format!("polling_{:.6}", post_filled));
            (
                Some(FillEvent {
                    trade_id,
                    size: delta,
                    price,
                    cumulative_filled: post_filled,
                    is_complete_fill: complete,
                    tx_hash,
                }),
                complete,
            )
        } else {
            (None, complete)
        }
    }

    /// Credit an incremental fill (user-trade path).
    fn credit_delta(
        &mut self,
        delta: f64,
        price: f64,
        trade_id: &str,
        tx_hash: Option<String>,
        ts_ms: i64,
    ) -> (Option<FillEvent>, bool) {
        let post = self.order.filled_size + delta;
        self.credit_to(post, price, Some(trade_id), tx_hash, None, ts_ms)
    }

    fn complete_now(&self, reported_status: Option<OrderStatus>) -> bool {
        reported_status == Some(OrderStatus::Filled)
            || self.order.remaining_size <= SIZE_EPS
            || (!self.order.kind.is_market()
                && self.order.filled_size >= self.order.original_size - SIZE_EPS
                && self.order.original_size > 0.0)
    }

    // =========================================================================
    // Status transitions
    // =========================================================================

    /// Apply a status transition. Same-state is a no-op; invalid transitions
    /// emit `error` without mutating; terminal states accept nothing more.
    fn transition(&mut self, to: OrderStatus, ts_ms: i64) -> (Vec<OrderEvent>, bool) {
        let from = self.order.status;
        if from == to {
            return (Vec::new(), false);
        }
        if from.is_terminal() {
            warn!(
                order_id = %self.order.order_id,
                "status signal {} after terminal {}, ignoring", to, from
            );
            return (
                vec![OrderEvent::Error {
                    order_id: Some(self.order.order_id.clone()),
                    message: format!("invalid status transition {} -> {}", from, to),
                }],
                false,
            );
        }
        if !transition_valid(from, to) {
            warn!(
                order_id = %self.order.order_id,
                "invalid status transition {} -> {}", from, to
            );
            return (
                vec![OrderEvent::Error {
                    order_id: Some(self.order.order_id.clone()),
                    message: format!("invalid status transition {} -> {}", from, to),
                }],
                false,
            );
        }

        self.order.status = to;
        self.order.updated_at_ms = ts_ms;
        (
            vec![OrderEvent::StatusChange {
                order_id: self.order.order_id.clone(),
                from,
                to,
            }],
            true,
        )
    }

    /// Apply a target status and emit the typed lifecycle events, attaching
    /// the pending fill to the right one so it is reported exactly once.
    fn emit_for_target(
        &mut self,
        target: OrderStatus,
        mut pending_fill: Option<FillEvent>,
        ts_ms: i64,
    ) -> Vec<OrderEvent> {
        let (mut events, applied) = self.transition(target, ts_ms);

        match target {
            OrderStatus::Open => {
                if applied {
                    events.push(OrderEvent::Opened {
                        order: self.order.clone(),
                    });
                }
            }
            OrderStatus::PartiallyFilled => {
                if let Some(fill) = pending_fill.take() {
                    events.push(OrderEvent::PartiallyFilled {
                        order: self.order.clone(),
                        fill,
                    });
                }
            }
            OrderStatus::Filled => {
                if applied {
                    events.push(OrderEvent::Filled {
                        order: self.order.clone(),
                        fill: pending_fill.take(),
                    });
                }
            }
            OrderStatus::Cancelled => {
                // A fill reported together with the cancellation (FAK
                // residual) still has to be surfaced
                if let Some(fill) = pending_fill.take() {
                    events.push(OrderEvent::PartiallyFilled {
                        order: self.order.clone(),
                        fill,
                    });
                }
                if applied {
                    let reason = if self.cancel_requested {
                        CancelReason::User
                    } else {
                        CancelReason::System
                    };
                    events.push(OrderEvent::Cancelled {
                        order: self.order.clone(),
                        reason,
                        cancelled_size: self.order.remaining_size.max(0.0),
                    });
                }
            }
            OrderStatus::Expired => {
                if applied {
                    events.push(OrderEvent::Expired {
                        order: self.order.clone(),
                    });
                }
            }
            _ => {}
        }

        events
    }

    // =========================================================================
    // Apply paths
    // =========================================================================

    /// User-channel order message: authoritative for status changes; matched
    /// size is reconciled in case trade messages were missed.
    pub fn apply_user_order(&mut self, msg: &UserOrderMsg, ts_ms: i64) -> Vec<OrderEvent> {
        let key = format!("order:{}:{}:{}", msg.id, msg.msg_type, ts_ms);
        if !self.processed.insert(key) {
            debug!(order_id = %msg.id, "duplicate user order event, dropping");
            return Vec::new();
        }

        let kind = msg.order_kind();
        if self.cancel_requested && kind != UserOrderKind::Cancellation {
            debug!(order_id = %msg.id, "cancel requested, ignoring {:?}", kind);
            return Vec::new();
        }

        // Adopt sizes for orders watched without creation context
        if self.order.original_size <= SIZE_EPS {
            if let Ok(orig) = msg.original_size.parse::<f64>() {
                if orig > 0.0 {
                    self.order.original_size = orig;
                    self.order.remaining_size = orig - self.order.filled_size;
                }
            }
        }
        if self.order.price <= 0.0 {
            self.order.price = msg.price.parse().unwrap_or(0.0);
        }

        let size_matched: f64 = msg.size_matched.parse().unwrap_or(0.0);
        let price = msg.price.parse().unwrap_or(self.order.price);
        let reported = msg.status.as_deref().and_then(OrderStatus::from_str);

        let (pending_fill, complete) =
            self.credit_to(size_matched, price, None, None, reported, ts_ms);

        let target = match kind {
            UserOrderKind::Placement => OrderStatus::Open,
            UserOrderKind::Cancellation => {
                // GTD orders cancelled at their expiration time expired
                let expired = self.order.kind == OrderKind::GTD
                    && self
                        .order
                        .expiration
                        .map(|e| e * 1000 <= ts_ms)
                        .unwrap_or(false);
                if expired {
                    OrderStatus::Expired
                } else {
                    OrderStatus::Cancelled
                }
            }
            UserOrderKind::Update => {
                if complete || self.complete_now(reported) {
                    OrderStatus::Filled
                } else if self.order.filled_size > SIZE_EPS {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::Open
                }
            }
        };

        self.emit_for_target(target, pending_fill, ts_ms)
    }

    /// User-channel trade message: materializes fills. Our share of the
    /// trade is the full size when we are the taker, otherwise the sum of
    /// our maker orders' matched amounts.
    pub fn apply_user_trade(&mut self, msg: &UserTradeMsg, ts_ms: i64) -> Vec<OrderEvent> {
        let mut events = Vec::new();
        let our_id = self.order.order_id.clone();

        let is_taker = msg.taker_order_id.as_deref() == Some(our_id.as_str());
        let share: f64 = if is_taker {
            msg.size.parse().unwrap_or(0.0)
        } else {
            msg.maker_orders
                .iter()
                .filter(|m| m.order_id == our_id)
                .filter_map(|m| m.matched_amount.parse::<f64>().ok())
                .sum()
        };
        if share <= SIZE_EPS {
            return events;
        }

        let status = TradeStatus::from_str_or_default(&msg.status);

        if self.order.trade_ids.iter().any(|t| t == &msg.id) {
            // Known trade: only transaction-status progressions matter
            if let Some(tx) = &msg.transaction_hash {
                let key = format!("txsub:{}", msg.id);
                if self.processed.insert(key) {
                    events.push(OrderEvent::TransactionSubmitted {
                        order_id: our_id.clone(),
                        trade_id: msg.id.clone(),
                        tx_hash: tx.clone(),
                    });
                }
            }
            if status == TradeStatus::Failed {
                events.push(OrderEvent::Error {
                    order_id: Some(our_id),
                    message: format!("trade {} failed on-chain", msg.id),
                });
            }
            return events;
        }

        if self.cancel_requested {
            debug!(order_id = %our_id, "cancel requested, ignoring trade {}", msg.id);
            return events;
        }

        let key = format!("trade:{}:{}", msg.id, ts_ms);
        if !self.processed.insert(key) {
            debug!(trade_id = %msg.id, "duplicate trade event, dropping");
            return events;
        }

        self.order.trade_ids.push(msg.id.clone());

        let price = msg.price.parse().unwrap_or(self.order.price);
        let (pending_fill, complete) =
            self.credit_delta(share, price, &msg.id, msg.transaction_hash.clone(), ts_ms);

        let target = if complete {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        events.extend(self.emit_for_target(target, pending_fill, ts_ms));

        if let Some(tx) = &msg.transaction_hash {
            let key = format!("txsub:{}", msg.id);
            if self.processed.insert(key) {
                events.push(OrderEvent::TransactionSubmitted {
                    order_id: our_id,
                    trade_id: msg.id.clone(),
                    tx_hash: tx.clone(),
                });
            }
        }

        events
    }

    /// Polling snapshot: authoritative when the WebSocket is silent. An
    /// increase in matched size synthesizes one fill for the delta at the
    /// order's limit price, keyed by the post-fill size so the user channel
    /// cannot re-emit it.
    pub fn apply_poll(&mut self, rest: &RestOrder, now_ms: i64) -> Vec<OrderEvent> {
        // Adopt baseline on first observation
        if self.order.original_size <= SIZE_EPS && rest.original_size > 0.0 {
            self.order.original_size = rest.original_size;
            self.order.remaining_size = rest.remaining_size;
            if self.order.price <= 0.0 {
                self.order.price = rest.price;
            }
            if self.order.token_id.is_empty() {
                self.order.token_id = rest.token_id.clone();
                self.order.side = rest.side;
                self.order.kind = rest.kind;
                self.order.expiration = rest.expiration;
            }
        }

        if self.cancel_requested && !rest.status.is_terminal() {
            return Vec::new();
        }

        let mut pending_fill = None;
        let mut complete = false;
        if rest.size_matched > self.order.filled_size + SIZE_EPS {
            let price = if self.order.price > 0.0 {
                self.order.price
            } else {
                rest.price
            };
            let (fill, c) = self.credit_to(
                rest.size_matched,
                price,
                None,
                None,
                Some(rest.status),
                now_ms,
            );
            pending_fill = fill;
            complete = c;
            // Venue-reported remaining is authoritative, market kinds
            // especially
            self.order.remaining_size = rest.remaining_size;
        }

        let mut target = rest.status;
        if !target.is_terminal() {
            if complete || self.order.remaining_size <= SIZE_EPS {
                target = OrderStatus::Filled;
            } else if self.order.filled_size > SIZE_EPS && target == OrderStatus::Open {
                target = OrderStatus::PartiallyFilled;
            }
        }

        self.emit_for_target(target, pending_fill, now_ms)
    }

    /// Venue-confirmed cancellation initiated by the user. Stops accepting
    /// further lifecycle mutations immediately.
    pub fn force_cancel(&mut self, ts_ms: i64) -> Vec<OrderEvent> {
        self.cancel_requested = true;
        self.emit_for_target(OrderStatus::Cancelled, None, ts_ms)
    }

    /// Mark that a cancel was requested; subsequent non-terminal signals are
    /// ignored until the venue confirms.
    pub fn mark_cancel_requested(&mut self) {
        self.cancel_requested = true;
    }
}
