//! Health endpoints and Prometheus metrics.

pub mod health;
pub mod metrics;
