//! Deadline tracking.
//!
//! The [`wheel`] module holds the hierarchical timer wheel that every message
//! loop owns. Loop-facing timer surfaces (tokens, wall-clock anchoring) live
//! in [`crate::runtime`].

pub mod wheel;

pub use wheel::{fn_event, Tick, TimerEvent, TimerHandle, TimerWheel};
