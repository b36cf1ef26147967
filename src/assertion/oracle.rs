//! Visual oracle capability: judges whether screenshots match a textual expectation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{E2eError, E2eResult};

/// Most images a single oracle call accepts
pub const MAX_IMAGES: usize = 3;

/// Verdict returned by a visual oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleVerdict {
    pub success: bool,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl OracleVerdict {
    pub fn new(success: bool, confidence: f64, reason: &str) -> Self {
        Self {
            success,
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
            reason: reason.to_string(),
            warning: None,
        }
    }

    /// Failing verdict used when the oracle could not produce a judgement
    pub fn degraded(reason: &str) -> Self {
        Self::new(false, 0.0, reason)
    }
}

impl std::fmt::Display for OracleVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "PASS" } else { "FAIL" };
        write!(
            f,
            "{} (confidence: {:.2}) - {}",
            status, self.confidence, self.reason
        )?;
        if let Some(ref warning) = self.warning {
            write!(f, " [WARNING: {}]", warning)?;
        }
        Ok(())
    }
}

/// A pluggable judge for screenshot assertions.
///
/// `images` are base64-encoded (one to [`MAX_IMAGES`]); `expected` is the plain-language
/// outcome to check for. Implementations may be slow and may fail; callers bound them with
/// a timeout and degrade errors to failing assertions.
#[async_trait]
pub trait VisualOracle: Send + Sync {
    /// Short name for logs and reports
    fn name(&self) -> &str;

    async fn judge(&self, images: &[String], expected: &str) -> E2eResult<OracleVerdict>;
}

/// Scripted response for [`ScriptedOracle`]
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Verdict(OracleVerdict),
    Error(String),
    /// Never answer
    Hang,
}

/// A recorded oracle call
#[derive(Debug, Clone, PartialEq)]
pub struct OracleCall {
    pub images: Vec<String>,
    pub expected: String,
}

/// In-memory oracle that replays scripted replies in order and records every call.
///
/// Once the script runs out the fallback reply is repeated.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    calls: Mutex<Vec<OracleCall>>,
}

impl ScriptedOracle {
    /// Always answer with `verdict`
    pub fn always(verdict: OracleVerdict) -> Self {
        Self::scripted(Vec::new(), ScriptedReply::Verdict(verdict))
    }

    pub fn scripted(replies: Vec<ScriptedReply>, fallback: ScriptedReply) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<OracleCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn next_reply(&self) -> ScriptedReply {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl VisualOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn judge(&self, images: &[String], expected: &str) -> E2eResult<OracleVerdict> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(OracleCall {
                images: images.to_vec(),
                expected: expected.to_string(),
            });

        match self.next_reply() {
            ScriptedReply::Verdict(verdict) => Ok(verdict),
            ScriptedReply::Error(message) => Err(E2eError::Oracle(message)),
            ScriptedReply::Hang => std::future::pending().await,
        }
    }
}
