//! # polydip
//!
//! Real-time order and position lifecycle engine for a CLOB-style
//! prediction-market venue.
//!
//! ## Layers
//!
//! - **wire**: untagged-union event demultiplexer and subscription frames
//! - **bus**: per-subject fan-out over livesock connections
//! - **venue** / **ctf**: capability traits for the REST API and on-chain
//!   conditional-token operations
//! - **oms**: order validation, state machine, awaitable handles, manager
//! - **strategy**: the two-leg dip arbitrage engine and market rotation
//! - **oracle**: underlying-asset price feed cache

pub mod bus;
pub mod config;
pub mod ctf;
pub mod domain;
pub mod logging;
pub mod oms;
pub mod oracle;
pub mod strategy;
pub mod utils;
pub mod venue;
pub mod wire;
