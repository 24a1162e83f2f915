//! Order management: validation, per-order state machine, awaitable
//! handles, and the composition-root manager.

pub mod events;
pub mod handle;
pub mod manager;
pub mod settlement;
pub mod state;
pub mod validator;

pub use events::{CancelReason, FillEvent, OrderEvent};
pub use handle::{OrderHandle, OrderOutcome, OutcomeStatus};
pub use manager::{OrderManager, OrderManagerSettings, OrderMeta, WatchMode};
pub use state::{OrderRecord, OrderState};
pub use validator::{validate_limit_order, validate_market_order, RejectReason};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OmsError {
    #[error("order manager not started")]
    NotStarted,

    #[error("batch too large: {0} orders (max 15)")]
    BatchTooLarge(usize),

    #[error("venue error: {0}")]
    Venue(#[from] crate::venue::VenueError),

    #[error("chain provider error: {0}")]
    Chain(String),
}

pub type Result<T> = std::result::Result<T, OmsError>;
