//! Pre-flight order validation.
//!
//! Replicates the venue's minimum-order rules so bad orders never leave the
//! process: tick = 0.01, min 5 shares, min $1 notional, market orders are
//! FOK/FAK with at least $1.

use crate::venue::{LimitOrderParams, MarketOrderParams};

/// Minimum number of shares for a limit order
pub const MIN_ORDER_SHARES: f64 = 5.0;

/// Minimum notional value in quote currency
pub const MIN_ORDER_NOTIONAL: f64 = 1.0;

/// Reason an order failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Price is not a multiple of the 0.01 tick
    TickSize,
    /// Price outside (0, 1)
    PriceRange,
    /// Fewer than 5 shares
    MinShares,
    /// price * size below $1
    MinNotional,
    /// Market order amount below $1
    MinAmount,
    /// Market orders must be FOK or FAK
    OrderKind,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::TickSize => write!(f, "price is not a multiple of 0.01"),
            RejectReason::PriceRange => write!(f, "price must be within (0, 1)"),
            RejectReason::MinShares => {
                write!(f, "size below minimum of {} shares", MIN_ORDER_SHARES)
            }
            RejectReason::MinNotional => {
                write!(f, "notional below minimum of ${}", MIN_ORDER_NOTIONAL)
            }
            RejectReason::MinAmount => {
                write!(f, "amount below minimum of ${}", MIN_ORDER_NOTIONAL)
            }
            RejectReason::OrderKind => write!(f, "market orders must be FOK or FAK"),
        }
    }
}

/// Check whether `price` sits on the 0.01 grid within a 1e-3 tolerance.
///
/// Evaluated at integer-mill precision: scaling to mills and rounding
/// absorbs float noise, then the grid check is exact.
fn on_cent_grid(price: f64) -> bool {
    let mills = (price * 1000.0).round() as i64;
    mills % 10 == 0
}

/// Validate a limit order against the venue's minimum-order rules.
pub fn validate_limit_order(params: &LimitOrderParams) -> Result<(), RejectReason> {
    if params.price <= 0.0 || params.price >= 1.0 {
        return Err(RejectReason::PriceRange);
    }
    if !on_cent_grid(params.price) {
        return Err(RejectReason::TickSize);
    }
    if params.size < MIN_ORDER_SHARES {
        return Err(RejectReason::MinShares);
    }
    if params.price * params.size < MIN_ORDER_NOTIONAL {
        return Err(RejectReason::MinNotional);
    }
    Ok(())
}

/// Validate a market order: FOK/FAK only, amount at least $1.
pub fn validate_market_order(params: &MarketOrderParams) -> Result<(), RejectReason> {
    if !params.kind.is_market() {
        return Err(RejectReason::OrderKind);
    }
    if params.amount < MIN_ORDER_NOTIONAL {
        return Err(RejectReason::MinAmount);
    }
    Ok(())
}
