//! Evaluates declared assertions against the artifacts of a finished run.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::oracle::{OracleVerdict, VisualOracle};
use crate::parser::types::{Assertion, AssertionKind};
use crate::transport::Screenshot;

/// Confidence below which a passing verdict carries a warning
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Upper bound on a single oracle call
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one declared assertion
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub assertion: Assertion,
    pub passed: bool,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_result: Option<OracleVerdict>,
}

impl AssertionResult {
    fn failed(assertion: &Assertion, details: String) -> Self {
        Self {
            assertion: assertion.clone(),
            passed: false,
            details,
            oracle_result: None,
        }
    }
}

/// Ordered assertion results, one per declared assertion
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssertionReport {
    pub results: Vec<AssertionResult>,
}

impl AssertionReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    /// True when every result passed; vacuously true for an empty report
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

pub struct AssertionEngine {
    oracle: Option<Arc<dyn VisualOracle>>,
    confidence_threshold: f64,
    oracle_timeout: Duration,
}

impl AssertionEngine {
    pub fn new(oracle: Option<Arc<dyn VisualOracle>>) -> Self {
        Self {
            oracle,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    /// Evaluate every assertion in declaration order.
    ///
    /// `screenshots` must keep the order they were captured in; containment lookups pick the
    /// first match in that order.
    pub async fn evaluate(
        &self,
        assertions: &[Assertion],
        screenshots: &[Screenshot],
    ) -> AssertionReport {
        let mut report = AssertionReport::default();

        for assertion in assertions {
            let result = match assertion.kind {
                AssertionKind::Screenshot => self.evaluate_screenshot(assertion, screenshots).await,
                ref other => AssertionResult::failed(
                    assertion,
                    format!("Unsupported assertion type: {}", other),
                ),
            };

            if !result.passed {
                log::warn!("Assertion '{}' failed: {}", assertion.name, result.details);
            }
            report.results.push(result);
        }

        report
    }

    async fn evaluate_screenshot(
        &self,
        assertion: &Assertion,
        screenshots: &[Screenshot],
    ) -> AssertionResult {
        let Some(screenshot) = find_screenshot(&assertion.name, screenshots) else {
            return AssertionResult::failed(
                assertion,
                format!("Screenshot '{}' not found in results.", assertion.name),
            );
        };

        let Some(ref oracle) = self.oracle else {
            return AssertionResult::failed(
                assertion,
                "No visual oracle configured. Cannot validate screenshots.".to_string(),
            );
        };

        let expected = assertion.expected();
        log::debug!(
            "Judging '{}' with {} oracle: {}",
            screenshot.name,
            oracle.name(),
            expected
        );

        let images = [screenshot.data.clone()];
        let verdict = match tokio::time::timeout(self.oracle_timeout, oracle.judge(&images, expected))
            .await
        {
            Ok(Ok(verdict)) => self.with_confidence_warning(verdict),
            Ok(Err(e)) => OracleVerdict::degraded(&format!("Visual validation error: {}", e)),
            Err(_) => OracleVerdict::degraded(&format!(
                "Visual validation timed out after {:.1}s",
                self.oracle_timeout.as_secs_f64()
            )),
        };

        AssertionResult {
            assertion: assertion.clone(),
            passed: verdict.success,
            details: verdict.reason.clone(),
            oracle_result: Some(verdict),
        }
    }

    /// Attach a low-confidence warning; never changes the verdict itself
    fn with_confidence_warning(&self, mut verdict: OracleVerdict) -> OracleVerdict {
        if verdict.warning.is_none() && verdict.confidence < self.confidence_threshold {
            verdict.warning = Some(format!(
                "Low confidence: {:.2} (threshold: {})",
                verdict.confidence, self.confidence_threshold
            ));
        }
        verdict
    }
}

/// Exact name first, then the first artifact whose name contains `name`
fn find_screenshot<'a>(name: &str, screenshots: &'a [Screenshot]) -> Option<&'a Screenshot> {
    screenshots
        .iter()
        .find(|s| s.name == name)
        .or_else(|| screenshots.iter().find(|s| s.name.contains(name)))
}
