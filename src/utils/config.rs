use std::path::PathBuf;
use std::time::Duration;

use crate::assertion::engine::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_ORACLE_TIMEOUT};
use crate::discovery::{DEFAULT_DISCOVERY_PORT, DEFAULT_DISCOVERY_TIMEOUT};
use crate::parser::Scenario;
use crate::transport::client::DEFAULT_REQUEST_TIMEOUT;
use crate::transport::RetryPolicy;

/// Test timeout used when neither the CLI nor the scenario sets a positive one
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Budget for the readiness probe before a scenario is submitted
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Share of an explicit `--timeout` given to discovery
const DISCOVERY_SHARE: f64 = 0.1;

/// Run configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// UDP port target apps broadcast on
    pub discovery_port: u16,

    pub discovery_timeout: Duration,

    /// Overall polling budget; `None` uses the scenario's `meta.timeout`
    pub test_timeout: Option<Duration>,

    pub poll_interval: Duration,

    /// Timeout for result retrieval
    pub request_timeout: Duration,

    pub retry_policy: RetryPolicy,

    /// Probe the health endpoint before submitting
    pub readiness_probe: bool,

    pub connect_timeout: Duration,

    pub confidence_threshold: f64,

    pub oracle_timeout: Duration,

    /// Only accept broadcasts from this app
    pub app_filter: Option<String>,

    /// Where to persist screenshots; nothing is written when unset
    pub screenshot_dir: Option<PathBuf>,

    pub report_dir: PathBuf,

    /// Write the JSON report to `report_dir`
    pub save_report: bool,

    /// Write a JUnit XML report to `report_dir`
    pub junit: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_DISCOVERY_PORT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            test_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            readiness_probe: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            app_filter: None,
            screenshot_dir: None,
            report_dir: PathBuf::from("."),
            save_report: false,
            junit: false,
        }
    }
}

impl RunConfig {
    /// Apply an explicit overall timeout. Discovery gets 10% of it unless set separately.
    pub fn with_total_timeout(mut self, timeout: Duration, discovery: Option<Duration>) -> Self {
        self.test_timeout = Some(timeout);
        self.discovery_timeout = discovery.unwrap_or_else(|| timeout.mul_f64(DISCOVERY_SHARE));
        self
    }

    /// Polling budget for `scenario`
    pub fn test_timeout_for(&self, scenario: &Scenario) -> Duration {
        self.test_timeout.unwrap_or_else(|| {
            u64::try_from(scenario.meta.timeout)
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TEST_TIMEOUT)
        })
    }
}
