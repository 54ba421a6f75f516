//! Domain modules organized as vertical slices.
//!
//! Each sub-module contains:
//! - `mod.rs`: Domain types and business logic
//! - `wire.rs`: Raw serde structs matching venue payloads
//! - `state.rs`: State containers with update methods (for stream-driven data)

pub mod candle;
pub mod order;
pub mod orderbook;
pub mod portfolio;
pub mod trade;
