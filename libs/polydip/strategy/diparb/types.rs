//! Round lifecycle types and strategy events.

use crate::domain::{MarketDescriptor, OutcomeSide, Underlying};
use crate::strategy::diparb::signal::SignalKind;

/// Phase of an arbitrage round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Watching for a leg-1 signal
    Waiting,
    /// Leg 1 filled, scheduling leg 2
    Leg1Filled,
    /// Both legs filled (and merged when auto-merge is on)
    Completed,
    /// Leg-2 timeout or market end; position unwound or held
    Expired,
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundPhase::Waiting => write!(f, "waiting"),
            RoundPhase::Leg1Filled => write!(f, "leg1_filled"),
            RoundPhase::Completed => write!(f, "completed"),
            RoundPhase::Expired => write!(f, "expired"),
        }
    }
}

/// Aggregated fill of one leg (possibly across several child orders)
#[derive(Debug, Clone)]
pub struct LegFill {
    pub side: OutcomeSide,
    pub token_id: String,
    pub shares: f64,
    pub avg_price: f64,
    /// Quote currency spent
    pub cost: f64,
    pub order_ids: Vec<String>,
    pub filled_at_ms: Option<i64>,
}

/// One arbitrage round on a single market
#[derive(Debug, Clone)]
pub struct Round {
    /// `slug ⊕ start time`
    pub round_id: String,
    pub market: MarketDescriptor,
    pub phase: RoundPhase,
    pub started_at_ms: i64,
    /// Underlying reference price at round start; 0 when unknown
    pub price_to_beat: f64,
    pub open_up_ask: f64,
    pub open_down_ask: f64,
    pub leg1: Option<LegFill>,
    pub leg2: Option<LegFill>,
    pub total_cost: Option<f64>,
    pub profit: Option<f64>,
    /// Both legs merged back to collateral
    pub merged: bool,
}

impl Round {
    pub fn new(
        market: MarketDescriptor,
        started_at_ms: i64,
        price_to_beat: f64,
        open_up_ask: f64,
        open_down_ask: f64,
    ) -> Self {
        let round_id = format!("{}-{}", market.slug, started_at_ms);
        Self {
            round_id,
            market,
            phase: RoundPhase::Waiting,
            started_at_ms,
            price_to_beat,
            open_up_ask,
            open_down_ask,
            leg1: None,
            leg2: None,
            total_cost: None,
            profit: None,
            merged: false,
        }
    }

    /// Legs still held as tokens (not merged away)
    pub fn held_legs(&self) -> Vec<&LegFill> {
        if self.merged {
            return Vec::new();
        }
        self.leg1.iter().chain(self.leg2.iter()).collect()
    }
}

/// Result of the emergency unwind after a leg-2 timeout
#[derive(Debug, Clone)]
pub struct ExitResult {
    /// False when the exit was blocked (notional below the venue minimum)
    pub attempted: bool,
    pub success: bool,
    /// Quote currency recovered by the exit sell
    pub recovered: f64,
    pub order_id: Option<String>,
    pub reason: Option<String>,
}

/// Strategy event stream payload. Names from [`DipArbEvent::name`] are
/// contractual.
#[derive(Debug, Clone)]
pub enum DipArbEvent {
    Started,
    Stopped,
    NewRound {
        round_id: String,
    },
    PriceUpdate {
        underlying: Underlying,
        price: f64,
    },
    Signal {
        leg: u8,
        side: OutcomeSide,
        kind: SignalKind,
        detail: String,
    },
    Execution {
        leg: u8,
        success: bool,
        shares: f64,
        avg_price: f64,
        detail: String,
    },
    RoundComplete {
        round: Round,
        exit: Option<ExitResult>,
    },
    Rotate {
        from: String,
        to: String,
    },
    Settled {
        condition_id: String,
        amount: f64,
    },
    Error {
        message: String,
    },
}

impl DipArbEvent {
    /// Stable wire name of this event
    pub fn name(&self) -> &'static str {
        match self {
            DipArbEvent::Started => "started",
            DipArbEvent::Stopped => "stopped",
            DipArbEvent::NewRound { .. } => "newRound",
            DipArbEvent::PriceUpdate { .. } => "priceUpdate",
            DipArbEvent::Signal { .. } => "signal",
            DipArbEvent::Execution { .. } => "execution",
            DipArbEvent::RoundComplete { .. } => "roundComplete",
            DipArbEvent::Rotate { .. } => "rotate",
            DipArbEvent::Settled { .. } => "settled",
            DipArbEvent::Error { .. } => "error",
        }
    }
}
