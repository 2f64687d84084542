pub mod broadcast;
pub mod config;
pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod session;
pub mod validate;
