//! Drives one scenario through discovery, submission, polling, collection and assertions.

use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

use super::collector::ResultCollector;
use super::events::{EventEmitter, RunEvent};
use super::state::{ExecutionResult, RunStage};
use crate::assertion::{AssertionEngine, VisualOracle};
use crate::discovery::{AppEndpoint, DiscoveryListener, TimeoutBudget};
use crate::error::{E2eError, E2eResult};
use crate::parser::Scenario;
use crate::report;
use crate::transport::{RetryPolicy, TransportClient};
use crate::utils::RunConfig;

/// Runs a single scenario against one application instance.
///
/// Stages run strictly in order and each is attempted once; the first failure ends the run.
/// The returned [`ExecutionResult`] always carries the duration and whatever the completed
/// stages produced.
pub struct Orchestrator {
    scenario: Scenario,
    config: RunConfig,
    endpoint: Option<AppEndpoint>,
    listener: Option<DiscoveryListener>,
    oracle: Option<Arc<dyn VisualOracle>>,
    events: Option<EventEmitter>,
}

impl Orchestrator {
    pub fn new(scenario: Scenario, config: RunConfig) -> Self {
        Self {
            scenario,
            config,
            endpoint: None,
            listener: None,
            oracle: None,
            events: None,
        }
    }

    /// Skip discovery and talk to `endpoint` directly
    pub fn with_endpoint(mut self, endpoint: AppEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Discover through an already bound listener instead of binding the configured port
    pub fn with_listener(mut self, listener: DiscoveryListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn VisualOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn execute(self) -> ExecutionResult {
        self.execute_until(std::future::pending::<()>()).await
    }

    /// Execute, stopping with [`E2eError::Interrupted`] if `interrupt` resolves first
    pub async fn execute_until<F>(mut self, interrupt: F) -> ExecutionResult
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let mut result = ExecutionResult::new(&self.scenario);
        log::info!(
            "Run {} started for {} ({})",
            result.run_id,
            self.scenario.meta.app,
            self.scenario.meta.platform
        );

        let outcome = tokio::select! {
            outcome = self.run_stages(&mut result) => outcome,
            _ = interrupt => Err(E2eError::Interrupted),
        };

        match outcome {
            Ok(()) => result.stage = RunStage::Done,
            Err(err) => {
                log::error!("Run stopped during {}: {}", result.stage, err);
                result.fail(&err);
            }
        }
        result.duration_ms = started.elapsed().as_millis() as u64;

        self.write_reports(&mut result);

        self.emit(RunEvent::StageChanged {
            stage: RunStage::Done,
        });
        self.emit(RunEvent::Finished {
            outcome: result.outcome(),
            passed: result.assertion_report.passed(),
            total: result.assertion_report.total(),
            duration_ms: result.duration_ms,
            error: result.error_message().map(|s| s.to_string()),
        });

        result
    }

    async fn run_stages(&mut self, result: &mut ExecutionResult) -> E2eResult<()> {
        let endpoint = match self.endpoint.clone() {
            Some(endpoint) => endpoint,
            None => {
                self.enter(result, RunStage::Discovering);
                self.discover().await?
            }
        };
        self.emit(RunEvent::Discovered {
            endpoint: endpoint.clone(),
        });
        result.endpoint = Some(endpoint.clone());

        self.enter(result, RunStage::Submitting);
        let client = TransportClient::for_endpoint(
            &endpoint,
            self.config.retry_policy,
            self.config.request_timeout,
        )?;
        if self.config.readiness_probe {
            self.wait_until_ready(&client).await?;
        }
        let session = client.submit_run(&self.scenario).await?;
        result.session_id = Some(session.session_id.clone());
        self.emit(RunEvent::SessionOpened {
            session_id: session.session_id.clone(),
        });

        self.enter(result, RunStage::Polling);
        let timeout = self.config.test_timeout_for(&self.scenario);
        let events = self.events.clone();
        let test_result = client
            .poll_until_complete(
                &session.session_id,
                timeout,
                self.config.poll_interval,
                |status| {
                    log::debug!(
                        "Session {}: {} {:.0}% ({}/{})",
                        session.session_id,
                        status.status,
                        status.progress * 100.0,
                        status.current_step,
                        status.total_steps
                    );
                    if let Some(ref events) = events {
                        events.emit(RunEvent::Progress {
                            status: status.clone(),
                        });
                    }
                },
            )
            .await?;
        client.close();

        self.enter(result, RunStage::Collecting);
        let artifacts = ResultCollector::new(self.config.screenshot_dir.clone()).collect(&test_result);
        for warning in &artifacts.warnings {
            self.emit(RunEvent::Warning {
                message: warning.clone(),
            });
        }
        result.logs = artifacts.logs;
        result.screenshots_saved = artifacts.saved_paths;
        result.collection_warnings = artifacts.warnings;

        self.enter(result, RunStage::Asserting);
        let engine = AssertionEngine::new(self.oracle.clone())
            .with_confidence_threshold(self.config.confidence_threshold)
            .with_oracle_timeout(self.config.oracle_timeout);
        let assertion_report = engine
            .evaluate(&self.scenario.assertions, &test_result.screenshots)
            .await;
        for assertion_result in &assertion_report.results {
            self.emit(RunEvent::AssertionEvaluated {
                result: assertion_result.clone(),
            });
        }
        log::info!(
            "Assertions: {}/{} passed",
            assertion_report.passed(),
            assertion_report.total()
        );

        result.all_passed = assertion_report.all_passed();
        result.assertion_report = assertion_report;
        Ok(())
    }

    async fn discover(&mut self) -> E2eResult<AppEndpoint> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => DiscoveryListener::bind(self.config.discovery_port)?,
        };
        listener
            .listen(
                self.config.discovery_timeout,
                self.config.app_filter.as_deref(),
                Some(self.scenario.meta.platform.as_str()),
            )
            .await
    }

    /// Probe the health endpoint until it answers or the connect budget runs out
    async fn wait_until_ready(&self, client: &TransportClient) -> E2eResult<()> {
        let url = client.base_url();
        let mut budget = TimeoutBudget::new(self.config.connect_timeout, RetryPolicy::aggressive());

        let probe = budget
            .run_with_observer(
                move || async move {
                    if client.health_check().await {
                        Ok(())
                    } else {
                        Err(E2eError::TransportConnection {
                            url: url.to_string(),
                            message: "health check failed".to_string(),
                        })
                    }
                },
                |attempt, err| {
                    log::info!("Target not ready ({}), retry {}", err, attempt);
                    self.emit(RunEvent::Retrying {
                        attempt,
                        error: err.to_string(),
                    });
                },
            )
            .await;

        probe.map_err(|err| match err {
            E2eError::OperationTimeout(limit) => E2eError::TransportConnection {
                url: url.to_string(),
                message: format!("not ready within {:.1}s", limit.as_secs_f64()),
            },
            other => other,
        })
    }

    fn enter(&self, result: &mut ExecutionResult, stage: RunStage) {
        log::info!("Stage: {}", stage);
        result.stage = stage;
        self.emit(RunEvent::StageChanged { stage });
    }

    fn emit(&self, event: RunEvent) {
        if let Some(ref events) = self.events {
            events.emit(event);
        }
    }

    fn write_reports(&self, result: &mut ExecutionResult) {
        if !self.config.save_report && !self.config.junit {
            return;
        }

        if self.config.save_report {
            let path = self
                .config
                .report_dir
                .join(report::json::report_file_name(&self.scenario.meta.app));
            match report::json::save_report(&report::JsonReport::from_result(result), &path) {
                Ok(()) => {
                    log::info!("Report saved: {}", path.display());
                    result.report_path = Some(path);
                }
                Err(e) => {
                    log::warn!("Failed to save report: {}", e);
                    self.emit(RunEvent::Warning {
                        message: format!("Failed to save report: {}", e),
                    });
                }
            }
        }

        if self.config.junit {
            match report::junit::write_report(result, &self.config.report_dir) {
                Ok(path) => log::info!("JUnit report saved: {}", path.display()),
                Err(e) => {
                    log::warn!("Failed to write JUnit report: {}", e);
                    self.emit(RunEvent::Warning {
                        message: format!("Failed to write JUnit report: {}", e),
                    });
                }
            }
        }
    }
}
