//! stratprobe: concurrent strategy-probe engine.
//!
//! Runs a catalog of declarative trading strategies bar by bar over shared
//! price series, in parallel, and persists per-group trade statistics
//! idempotently so interrupted runs can be resumed.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
