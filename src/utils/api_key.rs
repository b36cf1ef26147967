use std::path::{Path, PathBuf};

use crate::error::{E2eError, E2eResult};

/// Environment variable holding the Gemini API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const PLACEHOLDER_KEY: &str = "your_api_key_here";

/// `~/.flow/env`
pub fn default_env_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".flow").join("env"))
}

/// Load the Gemini API key from `GEMINI_API_KEY`, falling back to `~/.flow/env`
pub fn load_api_key() -> E2eResult<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        let key = key.trim();
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    let path = default_env_path()
        .ok_or_else(|| E2eError::Oracle("Could not find home directory".to_string()))?;
    load_api_key_from_file(&path)
}

/// Read `GEMINI_API_KEY=...` from an env-style file. Comments and blank lines are skipped.
pub fn load_api_key_from_file(path: &Path) -> E2eResult<String> {
    if !path.exists() {
        return Err(E2eError::Oracle(format!(
            "Gemini API key not found. Set {} or create {} with: {}=<your key>",
            API_KEY_ENV,
            path.display(),
            API_KEY_ENV
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let prefix = format!("{}=", API_KEY_ENV);

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.strip_prefix(&prefix))
        .map(str::trim)
        .find(|key| !key.is_empty() && *key != PLACEHOLDER_KEY)
        .map(|key| key.to_string())
        .ok_or_else(|| {
            E2eError::Oracle(format!(
                "{} not found or is a placeholder in {}",
                API_KEY_ENV,
                path.display()
            ))
        })
}
