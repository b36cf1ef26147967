use serde::{Deserialize, Serialize};

/// Remote execution status reported by the application under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Active test session returned by `POST /e2e/run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub session_id: String,
    #[serde(default = "default_session_status")]
    pub status: String,
}

fn default_session_status() -> String {
    "running".to_string()
}

/// Progress snapshot returned by `GET /e2e/status/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatus {
    pub status: RunStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub current_step: u32,
    #[serde(default)]
    pub total_steps: u32,
}

impl TestStatus {
    /// Clamp progress into [0, 1]; servers occasionally report percentages or NaN.
    pub(crate) fn normalized(mut self) -> Self {
        if !self.progress.is_finite() {
            log::warn!("Ignoring non-finite progress value from server");
            self.progress = 0.0;
        } else if !(0.0..=1.0).contains(&self.progress) {
            log::warn!("Clamping out-of-range progress {}", self.progress);
            self.progress = self.progress.clamp(0.0, 1.0);
        }
        self
    }
}

/// Screenshot captured on the device, base64 encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub name: String,
    pub data: String,
}

/// Log line emitted by the application during the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub message: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Terminal result returned by `GET /e2e/result/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub status: RunStatus,
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TestResult {
    pub fn has_screenshots(&self) -> bool {
        !self.screenshots.is_empty()
    }
}
