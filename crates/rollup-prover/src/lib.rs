//! Watches an inbox contract for proposals, proves them through one or more
//! proof backends and submits aggregated proofs back to the inbox.

pub mod buffer;
pub mod chain;
pub mod commands;
pub mod config;
pub mod inbox;
pub mod metrics;
pub mod producer;
pub mod prover;
pub mod retry;
pub mod state;
pub mod submitter;
