use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Represents a parsed E2E scenario from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub meta: ScenarioMeta,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default, rename = "assert")]
    pub assertions: Vec<Assertion>,

    /// File the scenario was loaded from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Scenario {
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn total_assertions(&self) -> usize {
        self.assertions.len()
    }

    /// Display name used in reports: the file stem, or the app name for inline scenarios
    pub fn name(&self) -> String {
        self.source
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.meta.app.clone())
    }
}

/// Scenario metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMeta {
    pub app: String,

    pub platform: Platform,

    /// Screen resolution as `WIDTHxHEIGHT`
    #[serde(default = "default_resolution")]
    pub resolution: String,

    /// Test timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: i64,

    #[serde(default)]
    pub description: String,
}

fn default_resolution() -> String {
    "1920x1080".to_string()
}

fn default_timeout() -> i64 {
    300
}

/// Target platform of the application under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Platform {
    Unity,
    Flutter,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Unity => "unity",
            Platform::Flutter => "flutter",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unity" => Ok(Platform::Unity),
            "flutter" => Ok(Platform::Flutter),
            other => Err(format!(
                "Invalid platform '{}'. Must be one of: flutter, unity",
                other
            )),
        }
    }
}

impl TryFrom<String> for Platform {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single scenario step executed by the application under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    /// Type text into a field
    Input {
        target: String,
        #[serde(deserialize_with = "scalar_string")]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    /// Tap an element
    Click {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    /// Pick a value from a dropdown or list
    Select {
        target: String,
        #[serde(deserialize_with = "scalar_string")]
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    /// Pause for a number of milliseconds
    Wait {
        ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    /// Capture the screen (or one element) under a name
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Input { .. } => "input",
            Step::Click { .. } => "click",
            Step::Select { .. } => "select",
            Step::Wait { .. } => "wait",
            Step::Screenshot { .. } => "screenshot",
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Step::Input { target, .. } | Step::Click { target, .. } | Step::Select { target, .. } => {
                Some(target)
            }
            Step::Screenshot { target, .. } => target.as_deref(),
            Step::Wait { .. } => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Step::Input { description, .. }
            | Step::Click { description, .. }
            | Step::Select { description, .. }
            | Step::Wait { description, .. }
            | Step::Screenshot { description, .. } => description.as_deref(),
        }
    }
}

/// Accept YAML scalars (`value: 3`, `text: true`) as their string form
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string, got {:?}",
            other
        ))),
    }
}

/// Kind of a declared assertion. Unknown kinds are preserved so they can be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssertionKind {
    Screenshot,
    Text,
    Element,
    Other(String),
}

impl AssertionKind {
    pub fn as_str(&self) -> &str {
        match self {
            AssertionKind::Screenshot => "screenshot",
            AssertionKind::Text => "text",
            AssertionKind::Element => "element",
            AssertionKind::Other(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, AssertionKind::Other(_))
    }
}

impl From<String> for AssertionKind {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "screenshot" => AssertionKind::Screenshot,
            "text" => AssertionKind::Text,
            "element" => AssertionKind::Element,
            _ => AssertionKind::Other(value),
        }
    }
}

impl From<AssertionKind> for String {
    fn from(kind: AssertionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared assertion, evaluated after the run completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: AssertionKind,

    /// Artifact name to evaluate (matched exactly, then by containment)
    pub name: String,

    /// Expected outcome in plain language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Assertion {
    pub fn screenshot(name: &str, description: Option<&str>) -> Self {
        Self {
            kind: AssertionKind::Screenshot,
            name: name.to_string(),
            description: description.map(|d| d.to_string()),
        }
    }

    /// Text handed to the visual oracle
    pub fn expected(&self) -> &str {
        self.description
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parsing() {
        assert_eq!("Unity".parse::<Platform>().unwrap(), Platform::Unity);
        assert_eq!("FLUTTER".parse::<Platform>().unwrap(), Platform::Flutter);
        assert!("android".parse::<Platform>().is_err());
    }

    #[test]
    fn test_assertion_kind_roundtrip_preserves_unknown() {
        let kind = AssertionKind::from("Visual-Diff".to_string());
        assert_eq!(kind, AssertionKind::Other("Visual-Diff".to_string()));
        assert!(!kind.is_known());
        assert_eq!(String::from(AssertionKind::from("TEXT".to_string())), "text");
    }

    #[test]
    fn test_serialized_wire_form() {
        let scenario = Scenario {
            meta: ScenarioMeta {
                app: "flow-editor".into(),
                platform: Platform::Unity,
                resolution: default_resolution(),
                timeout: 120,
                description: String::new(),
            },
            steps: vec![
                Step::Click {
                    target: "login_button".into(),
                    description: None,
                },
                Step::Screenshot {
                    target: None,
                    description: Some("after login".into()),
                },
            ],
            assertions: vec![Assertion::screenshot("login", Some("login form visible"))],
            source: None,
        };

        let value = serde_json::to_value(&scenario).unwrap();
        assert_eq!(value["meta"]["platform"], "unity");
        assert_eq!(value["meta"]["timeout"], 120);
        assert_eq!(
            value["steps"][0],
            serde_json::json!({"type": "click", "target": "login_button"})
        );
        assert_eq!(
            value["steps"][1],
            serde_json::json!({"type": "screenshot", "description": "after login"})
        );
        assert_eq!(
            value["assert"][0],
            serde_json::json!({"type": "screenshot", "name": "login", "description": "login form visible"})
        );
        assert!(value.get("source").is_none());
    }

    #[test]
    fn test_expected_falls_back_to_name() {
        assert_eq!(Assertion::screenshot("home", None).expected(), "home");
        assert_eq!(Assertion::screenshot("home", Some("")).expected(), "home");
        assert_eq!(
            Assertion::screenshot("home", Some("home visible")).expected(),
            "home visible"
        );
    }
}
