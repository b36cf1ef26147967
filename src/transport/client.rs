//! HTTP session client for the E2E endpoint embedded in the application under test.
//!
//! Three calls make up a run: `POST /e2e/run` submits a scenario and opens a session,
//! `GET /e2e/status/{id}` reports progress, and `GET /e2e/result/{id}` returns the
//! terminal snapshot with screenshots and logs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use super::retry::RetryPolicy;
use super::types::{RunStatus, TestResult, TestSession, TestStatus};
use crate::discovery::AppEndpoint;
use crate::error::{E2eError, E2eResult};

/// Per-call timeout for scenario submission
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-call timeout for status polls and health checks
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for result retrieval (results carry screenshots and can be large)
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct RunRequest<'a, S: Serialize + ?Sized> {
    scenario: &'a S,
}

/// HTTP client bound to one application endpoint.
///
/// The underlying connection pool lives exactly as long as this value and is released
/// on drop, so scoping the client to a block scopes the connection.
pub struct TransportClient {
    base_url: String,
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
}

impl TransportClient {
    /// Create a client for `base_url` (e.g. `http://192.168.1.100:51321`)
    pub fn new(
        base_url: &str,
        retry_policy: RetryPolicy,
        request_timeout: Duration,
    ) -> E2eResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| E2eError::Unexpected(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry_policy,
            request_timeout,
        })
    }

    /// Create a client for a discovered endpoint
    pub fn for_endpoint(
        endpoint: &AppEndpoint,
        retry_policy: RetryPolicy,
        request_timeout: Duration,
    ) -> E2eResult<Self> {
        Self::new(&endpoint.base_url(), retry_policy, request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Submit a scenario for execution and open a session
    pub async fn submit_run<S: Serialize + ?Sized>(&self, scenario: &S) -> E2eResult<TestSession> {
        let url = format!("{}/e2e/run", self.base_url);
        let body = RunRequest { scenario };
        let response = self
            .request_with_retry(reqwest::Method::POST, &url, Some(&body), SUBMIT_TIMEOUT)
            .await?;
        let session: TestSession = decode_json(response, &url).await?;
        log::info!("Session {} opened at {}", session.session_id, self.base_url);
        Ok(session)
    }

    /// Fetch the current execution status
    pub async fn get_status(&self, session_id: &str) -> E2eResult<TestStatus> {
        let url = format!("{}/e2e/status/{}", self.base_url, session_id);
        let response = self
            .request_with_retry::<()>(reqwest::Method::GET, &url, None, STATUS_TIMEOUT)
            .await?;
        let status: TestStatus = decode_json(response, &url).await?;
        Ok(status.normalized())
    }

    /// Fetch the terminal result with screenshots and logs
    pub async fn get_result(&self, session_id: &str) -> E2eResult<TestResult> {
        let url = format!("{}/e2e/result/{}", self.base_url, session_id);
        let response = self
            .request_with_retry::<()>(reqwest::Method::GET, &url, None, self.request_timeout)
            .await?;
        decode_json(response, &url).await
    }

    /// Poll status every `poll_interval` until the run reaches a terminal state.
    ///
    /// `on_progress` sees every status snapshot. On `completed` the result is fetched
    /// once and returned; on `failed` it is fetched once and its error text is raised
    /// as [`E2eError::RemoteTestFailure`].
    ///
    /// Status fetches, retries included, are cut off at `timeout`. The final result fetch
    /// may use at most one extra `poll_interval`.
    pub async fn poll_until_complete<F>(
        &self,
        session_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        mut on_progress: F,
    ) -> E2eResult<TestResult>
    where
        F: FnMut(&TestStatus),
    {
        let start = Instant::now();
        let deadline = start + timeout;

        while start.elapsed() < timeout {
            let status = within(deadline, timeout, self.get_status(session_id)).await?;
            on_progress(&status);

            match status.status {
                RunStatus::Completed => {
                    return within(deadline + poll_interval, timeout, self.get_result(session_id))
                        .await;
                }
                RunStatus::Failed => {
                    let result =
                        within(deadline + poll_interval, timeout, self.get_result(session_id))
                            .await?;
                    return Err(E2eError::RemoteTestFailure(
                        result.error.unwrap_or_else(|| "Unknown error".to_string()),
                    ));
                }
                _ => {}
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(poll_interval.min(remaining)).await;
        }

        Err(E2eError::PollTimeout(timeout))
    }

    /// Whether the E2E server answers at all. Any sub-500 response counts as healthy.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/e2e/status/health", self.base_url);
        match self.client.get(&url).timeout(STATUS_TIMEOUT).send().await {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(e) => {
                log::debug!("Health check against {} failed: {}", url, e);
                false
            }
        }
    }

    /// Release the connection pool explicitly
    pub fn close(self) {}

    async fn request_with_retry<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&B>,
        timeout: Duration,
    ) -> E2eResult<reqwest::Response> {
        let mut attempt = 0;
        loop {
            match self.send_once(method.clone(), url, body, timeout).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.retry_policy.max_retries => {
                    let delay = self.retry_policy.delay(attempt);
                    log::warn!(
                        "{} {} failed ({}), retry {}/{} in {:?}",
                        method,
                        url,
                        err,
                        attempt + 1,
                        self.retry_policy.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&B>,
        timeout: Duration,
    ) -> E2eResult<reqwest::Response> {
        let mut request = self.client.request(method, url).timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| map_send_error(e, url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(E2eError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        log::debug!("Closing transport session to {}", self.base_url);
    }
}

/// Run `call` until `deadline`; running out of time is a poll timeout of `timeout`
async fn within<T, Fut>(deadline: Instant, timeout: Duration, call: Fut) -> E2eResult<T>
where
    Fut: std::future::Future<Output = E2eResult<T>>,
{
    tokio::time::timeout_at(deadline, call)
        .await
        .unwrap_or(Err(E2eError::PollTimeout(timeout)))
}

fn map_send_error(err: reqwest::Error, url: &str) -> E2eError {
    if err.is_timeout() {
        E2eError::TransportTimeout {
            url: url.to_string(),
        }
    } else if err.is_builder() {
        E2eError::Unexpected(format!("Invalid request to {}: {}", url, err))
    } else {
        E2eError::TransportConnection {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> E2eResult<T> {
    let bytes = response.bytes().await.map_err(|e| map_send_error(e, url))?;
    serde_json::from_slice(&bytes).map_err(|e| E2eError::Protocol {
        url: url.to_string(),
        message: e.to_string(),
    })
}
