//! `logpulse`: a streaming log/metrics pipeline — CSV access logs in,
//! periodic bucketed traffic statistics and sliding-window alerts out.

pub mod component;
pub mod errors;
pub mod input;
pub mod logs;
pub mod metrics;
pub mod monitors;
pub mod processor;
pub mod router;
pub mod service;
