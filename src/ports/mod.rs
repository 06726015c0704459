//! Port traits between the domain and its adapters.

pub mod config_port;
pub mod data_port;
pub mod report_port;
pub mod result_port;
pub mod strategy_port;
