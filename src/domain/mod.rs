//! Core domain types and logic.

pub mod aggregator;
pub mod bar_series;
pub mod cancel;
pub mod condition;
pub mod condition_dsl;
pub mod condition_eval;
pub mod config_validation;
pub mod engine;
pub mod error;
pub mod exits;
pub mod job;
pub mod risk;
pub mod run_tracker;
pub mod runner;
pub mod strategy;
