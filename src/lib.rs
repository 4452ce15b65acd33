//! Discrete-event ride-hailing simulator.
//!
//! Simulated time advances in fixed windows over an undirected road network.
//! Each tick moves every en-route vehicle along its planned route, matches
//! newly available orders to idle vehicles and repositions the rest of the
//! idle fleet; matching and repositioning policies are pluggable. Runs are
//! deterministic for a fixed seed, and a finished run exports order and
//! fleet histories from which [`analyzer::OrderAnalyzer`] computes
//! service-quality metrics.

pub mod analyzer;
pub mod export;
pub mod model;
pub mod simulation;
pub mod strategy;
