use super::state::{RunOutcome, RunStage};
use crate::assertion::AssertionResult;
use crate::discovery::AppEndpoint;
use crate::transport::TestStatus;
use tokio::sync::broadcast;

/// Run events for real-time console updates
#[derive(Debug, Clone)]
pub enum RunEvent {
    StageChanged {
        stage: RunStage,
    },
    Discovered {
        endpoint: AppEndpoint,
    },
    SessionOpened {
        session_id: String,
    },
    Progress {
        status: TestStatus,
    },
    /// The readiness probe failed and is about to retry
    Retrying {
        attempt: u32,
        error: String,
    },
    AssertionEvaluated {
        result: AssertionResult,
    },
    Warning {
        message: String,
    },
    Finished {
        outcome: RunOutcome,
        passed: usize,
        total: usize,
        duration_ms: u64,
        error: Option<String>,
    },
}

/// Event emitter for broadcasting run events
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<RunEvent>) {
        let (sender, receiver) = broadcast::channel(100);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }
}

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Console event listener for printing real-time updates.
///
/// Everything goes to stderr; stdout is reserved for the machine-readable envelope.
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    /// Render events until every emitter is dropped
    pub async fn listen(mut receiver: broadcast::Receiver<RunEvent>) {
        use colored::Colorize;
        use std::io::IsTerminal;

        let interactive = std::io::stderr().is_terminal();
        let mut progress: Option<ProgressBar> = None;

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Console listener skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                RunEvent::StageChanged { stage } => {
                    if let Some(pb) = progress.take() {
                        pb.finish_and_clear();
                    }
                    match stage {
                        RunStage::Discovering => {
                            eprintln!("{} Waiting for target app broadcast...", "▶".blue().bold())
                        }
                        RunStage::Submitting => {
                            eprintln!("{} Submitting scenario", "▶".blue().bold())
                        }
                        RunStage::Polling => {
                            eprintln!("{} Waiting for test completion...", "▶".blue().bold());
                            progress = Some(new_progress_bar(interactive));
                        }
                        RunStage::Collecting => {
                            eprintln!("{} Collecting results", "▶".blue().bold())
                        }
                        RunStage::Asserting => {
                            eprintln!("{} Evaluating assertions", "▶".blue().bold())
                        }
                        RunStage::Init | RunStage::Done => {}
                    }
                }

                RunEvent::Discovered { endpoint } => {
                    eprintln!("  {} Connected to: {}", "✓".green(), endpoint.to_string().cyan());
                }

                RunEvent::SessionOpened { session_id } => {
                    eprintln!("  {} Session started: {}", "✓".green(), session_id.cyan());
                }

                RunEvent::Progress { status } => {
                    if status.total_steps == 0 {
                        continue;
                    }
                    let pct = (status.progress * 100.0).round() as u64;
                    let message = format!("{}/{} steps", status.current_step, status.total_steps);
                    match progress {
                        Some(ref pb) if interactive => {
                            pb.set_position(pct);
                            pb.set_message(message);
                        }
                        _ => eprintln!("  Progress: {}% ({})", pct, message),
                    }
                }

                RunEvent::Retrying { attempt, error } => {
                    eprintln!(
                        "  {} {}",
                        format!("↻ retry {}", attempt).yellow(),
                        error.dimmed()
                    );
                }

                RunEvent::AssertionEvaluated { result } => {
                    let status = if result.passed {
                        "PASS".green().bold()
                    } else {
                        "FAIL".red().bold()
                    };
                    eprintln!("  [{}] {}: {}", status, result.assertion.name, result.details);
                    if let Some(warning) = result.oracle_result.and_then(|v| v.warning) {
                        eprintln!("         {} {}", "⚠".yellow(), warning.yellow());
                    }
                }

                RunEvent::Warning { message } => {
                    eprintln!("  {} {}", "⚠".yellow(), message.yellow());
                }

                RunEvent::Finished {
                    outcome,
                    passed,
                    total,
                    duration_ms,
                    error,
                } => {
                    if let Some(pb) = progress.take() {
                        pb.finish_and_clear();
                    }
                    if let Some(error) = error {
                        eprintln!("{} {}", "ERROR:".red().bold(), error);
                    }
                    let status = match outcome {
                        RunOutcome::Passed => "PASSED".green().bold(),
                        RunOutcome::Failed => "FAILED".red().bold(),
                        RunOutcome::Interrupted => "INTERRUPTED".yellow().bold(),
                    };
                    eprintln!(
                        "\n{} Results: {}/{} passed [{}] in {}ms",
                        "■".blue().bold(),
                        passed,
                        total,
                        status,
                        duration_ms
                    );
                }
            }
        }

        if let Some(pb) = progress.take() {
            pb.finish_and_clear();
        }
    }
}

fn new_progress_bar(interactive: bool) -> ProgressBar {
    let target = if interactive {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(Some(100), target);
    if let Ok(style) = ProgressStyle::default_bar().template("  {bar:30.cyan/blue} {pos:>3}% {msg}") {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_when_emitters_drop() {
        let (emitter, receiver) = EventEmitter::new();
        let listener = tokio::spawn(ConsoleEventListener::listen(receiver));

        emitter.emit(RunEvent::StageChanged {
            stage: RunStage::Polling,
        });
        emitter.emit(RunEvent::Warning {
            message: "disk full".into(),
        });
        drop(emitter);

        listener.await.unwrap();
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let emitter = EventEmitter::default();
        emitter.emit(RunEvent::SessionOpened {
            session_id: "s1".into(),
        });
        assert_eq!(emitter.subscribe().len(), 0);
    }
}
