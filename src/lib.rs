//! spread-tx - Core Library
//! Futures/ready spread monitor with bounded-budget execution triggers

// Public modules
pub mod control;
pub mod core;
pub mod engine;
pub mod execution;
pub mod feeds;
pub mod ipc;
pub mod pairing;
pub mod runner;
pub mod snapshot;
pub mod spread;
pub mod trigger;

// Re-exports
pub use crate::core::{Config, Error, Result};
pub use engine::SpreadPipeline;
pub use runner::Runner;
