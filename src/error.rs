//! Error types for E2E runs

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error(
        "No target app found after {:.1}s on UDP port {port}. Make sure the app is running with E2E_TESTS=true.",
        .elapsed.as_secs_f64()
    )]
    DiscoveryTimeout { elapsed: Duration, port: u16 },

    #[error("Failed to bind discovery socket on UDP port {port}: {source}")]
    DiscoveryIo {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot reach {url}: {message}")]
    TransportConnection { url: String, message: String },

    #[error("Request to {url} timed out")]
    TransportTimeout { url: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Malformed response from {url}: {message}")]
    Protocol { url: String, message: String },

    #[error("Test failed: {0}")]
    RemoteTestFailure(String),

    #[error("Test did not complete within {:.1}s", .0.as_secs_f64())]
    PollTimeout(Duration),

    #[error("Operation timed out after {:.1}s", .0.as_secs_f64())]
    OperationTimeout(Duration),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Invalid scenario: {0}")]
    ScenarioInvalid(String),

    #[error("Invalid retry policy: {0}")]
    InvalidPolicy(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Test interrupted by user")]
    Interrupted,

    #[error("{0}")]
    Unexpected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Coarse classification of a run-level failure, recorded on the execution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DiscoveryTimeout,
    DiscoveryIo,
    Connection,
    PollTimeout,
    RemoteFailure,
    InvalidScenario,
    Interrupted,
    Unexpected,
}

impl E2eError {
    /// Whether the transport layer may retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            E2eError::TransportConnection { .. } | E2eError::TransportTimeout { .. } => true,
            E2eError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            E2eError::DiscoveryTimeout { .. } => FailureKind::DiscoveryTimeout,
            E2eError::DiscoveryIo { .. } => FailureKind::DiscoveryIo,
            E2eError::TransportConnection { .. }
            | E2eError::TransportTimeout { .. }
            | E2eError::HttpStatus { .. }
            | E2eError::Protocol { .. } => FailureKind::Connection,
            E2eError::PollTimeout(_) | E2eError::OperationTimeout(_) => FailureKind::PollTimeout,
            E2eError::RemoteTestFailure(_) => FailureKind::RemoteFailure,
            E2eError::ScenarioParse(_) | E2eError::ScenarioInvalid(_) => {
                FailureKind::InvalidScenario
            }
            E2eError::Interrupted => FailureKind::Interrupted,
            _ => FailureKind::Unexpected,
        }
    }

    /// Message shown to the operator and stored on the execution result.
    pub fn user_message(&self) -> String {
        match self.kind() {
            FailureKind::DiscoveryTimeout | FailureKind::PollTimeout => {
                format!("Timeout: {}", self)
            }
            FailureKind::Connection => format!("Connection failed: {}", self),
            FailureKind::DiscoveryIo => format!("Discovery failed: {}", self),
            FailureKind::RemoteFailure | FailureKind::InvalidScenario | FailureKind::Interrupted => {
                self.to_string()
            }
            FailureKind::Unexpected => format!("Unexpected error: {}", self),
        }
    }
}
