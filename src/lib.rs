pub mod client;
pub mod collector;
pub mod config;
pub mod config_validation;
pub mod connection_pool;
pub mod context;
pub mod controller;
pub mod errors;
pub mod metrics;
pub mod outcome;
pub mod percentiles;
pub mod rate_limiter;
pub mod report;
pub mod run_config;
pub mod template;
pub mod timing;
pub mod utils;
pub mod worker;
