//! Polydip Trading Bot - Main Library
//!
//! Facade crate for the workspace: re-exports the engine and the WebSocket
//! client library so binaries and integration code depend on one crate.
//!
//! ## Architecture
//!
//! - **polydip**: the order/position lifecycle engine and dip-arb strategy
//! - **livesock**: self-healing WebSocket client library

// Re-export workspace libraries for convenience
pub use livesock;
pub use polydip;
