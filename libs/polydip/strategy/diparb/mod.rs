//! Two-leg dip arbitrage on short-duration UP/DOWN markets.
//!
//! The edge: when `up_fill_price + down_fill_price < 1`, holding one share
//! of each outcome locks in the difference. Leg 1 buys a dipped side at
//! market; leg 2 buys the opposite side once the combined cost clears the
//! target; the hedged pair is merged back to collateral.

pub mod engine;
pub mod rotation;
pub mod signal;
pub mod types;

pub use engine::{DipArbEngine, EngineAction};
pub use rotation::{PendingRedemption, RotationScheduler};
pub use signal::{detect_leg1, Leg1Signal, PriceSample, PriceWindow, SignalKind};
pub use types::{DipArbEvent, ExitResult, LegFill, Round, RoundPhase};
