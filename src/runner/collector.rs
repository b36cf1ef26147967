//! Turns the terminal run result into local artifacts.

use base64::Engine as _;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::transport::{LogEntry, TestResult};

/// Artifacts gathered from a finished run
#[derive(Debug, Clone, Default)]
pub struct CollectedArtifacts {
    /// Saved screenshot files, in capture order
    pub saved_paths: Vec<PathBuf>,
    pub logs: Vec<LogEntry>,
    /// Screenshots that could not be decoded or written
    pub warnings: Vec<String>,
}

/// Collects logs and persists screenshots
pub struct ResultCollector {
    output_dir: Option<PathBuf>,
}

impl ResultCollector {
    /// `output_dir = None` keeps screenshots in memory only
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self { output_dir }
    }

    pub fn collect(&self, result: &TestResult) -> CollectedArtifacts {
        let mut artifacts = CollectedArtifacts {
            logs: result.logs.clone(),
            ..Default::default()
        };

        let Some(ref dir) = self.output_dir else {
            return artifacts;
        };

        let mut used = HashSet::new();
        for screenshot in &result.screenshots {
            let file_name = unique_file_name(&screenshot.name, &mut used);
            match save_screenshot(dir, &file_name, &screenshot.data) {
                Ok(path) => {
                    log::debug!("Saved screenshot {}", path.display());
                    artifacts.saved_paths.push(path);
                }
                Err(e) => {
                    let warning = format!("Failed to save screenshot '{}': {}", screenshot.name, e);
                    log::warn!("{}", warning);
                    artifacts.warnings.push(warning);
                }
            }
        }

        artifacts
    }
}

fn save_screenshot(dir: &Path, file_name: &str, data: &str) -> Result<PathBuf, String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| format!("invalid base64: {}", e))?;
    std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    let path = dir.join(file_name);
    std::fs::write(&path, bytes).map_err(|e| e.to_string())?;
    Ok(path)
}

/// File-system safe `<name>.png`, suffixed when a name repeats within one run
fn unique_file_name(name: &str, used: &mut HashSet<String>) -> String {
    let mut stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        stem = "unnamed".to_string();
    }

    let mut candidate = stem.clone();
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}_{}", stem, n);
        n += 1;
    }
    format!("{}.png", candidate)
}
