//! Bounded-concurrency execution pipeline for cross-DEX arbitrage
//! opportunities: initialization facade, standby failover, and the
//! lock-guarded dispatch loop that drives a pluggable [`strategy::Strategy`].

pub mod circuit_breaker;
pub mod config;
pub mod init;
pub mod pipeline;
pub mod simulation;
pub mod standby;
pub mod strategy;
