pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;

// Data shapes shared across stages
pub mod domain;
