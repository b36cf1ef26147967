//! HTTP transport to the application under test

pub mod client;
pub mod retry;
pub mod types;

pub use client::TransportClient;
pub use retry::RetryPolicy;
pub use types::{LogEntry, RunStatus, Screenshot, TestResult, TestSession, TestStatus};
