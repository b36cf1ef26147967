use super::types::{Assertion, Scenario, ScenarioMeta, Step};
use crate::error::{E2eError, E2eResult};
use serde_yaml::Value;
use std::path::Path;

/// Parse a YAML scenario file into a Scenario
pub fn parse_scenario_file(path: &Path) -> E2eResult<Scenario> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if extension != "yaml" && extension != "yml" {
        return Err(E2eError::ScenarioParse(format!(
            "Expected .yaml or .yml file, got: {}",
            path.display()
        )));
    }

    if !path.exists() {
        return Err(E2eError::ScenarioParse(format!(
            "Scenario file not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let mut scenario = parse_scenario_str(&content, &path.display().to_string())?;
    scenario.source = Some(path.to_path_buf());
    Ok(scenario)
}

/// Parse YAML content into a Scenario. `source` only appears in error messages.
pub fn parse_scenario_str(content: &str, source: &str) -> E2eResult<Scenario> {
    let document: Value = serde_yaml::from_str(content)
        .map_err(|e| parse_error(format!("Malformed YAML in {}: {}", source, e)))?;

    let root = match document {
        Value::Null => return Err(parse_error(format!("Empty scenario file: {}", source))),
        Value::Mapping(_) => document,
        _ => {
            return Err(parse_error(format!(
                "Scenario must be a YAML mapping in {}",
                source
            )))
        }
    };

    let meta = parse_meta(&root, source)?;

    let steps = parse_list(&root, "steps", source)?
        .into_iter()
        .enumerate()
        .map(|(i, item)| parse_step(item, i, source))
        .collect::<E2eResult<Vec<Step>>>()?;

    let assertions = parse_list(&root, "assert", source)?
        .into_iter()
        .enumerate()
        .map(|(i, item)| parse_assertion(item, i, source))
        .collect::<E2eResult<Vec<Assertion>>>()?;

    Ok(Scenario {
        meta,
        steps,
        assertions,
        source: None,
    })
}

fn parse_meta(root: &Value, source: &str) -> E2eResult<ScenarioMeta> {
    let meta = root
        .get("meta")
        .ok_or_else(|| parse_error(format!("Missing required field 'meta' in {}", source)))?;
    if !meta.is_mapping() {
        return Err(parse_error(format!("'meta' must be a mapping in {}", source)));
    }
    require_fields(meta, &["app", "platform"], "meta", source)?;

    serde_yaml::from_value(meta.clone()).map_err(|e| parse_error(format!("meta: {} ({})", e, source)))
}

/// A top-level list that may be absent or null
fn parse_list(root: &Value, key: &str, source: &str) -> E2eResult<Vec<Value>> {
    match root.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => Ok(items.clone()),
        Some(_) => Err(parse_error(format!("'{}' must be a list in {}", key, source))),
    }
}

fn parse_step(mut item: Value, index: usize, source: &str) -> E2eResult<Step> {
    let path = format!("steps[{}]", index);
    if !item.is_mapping() {
        return Err(parse_error(format!("Step {} must be a mapping in {}", index, source)));
    }
    require_fields(&item, &["type"], &path, source)?;
    normalize_type(&mut item, &path, source)?;

    serde_yaml::from_value(item).map_err(|e| parse_error(format!("{}: {} ({})", path, e, source)))
}

fn parse_assertion(mut item: Value, index: usize, source: &str) -> E2eResult<Assertion> {
    let path = format!("assert[{}]", index);
    if !item.is_mapping() {
        return Err(parse_error(format!(
            "Assertion {} must be a mapping in {}",
            index, source
        )));
    }
    require_fields(&item, &["type", "name"], &path, source)?;
    normalize_type(&mut item, &path, source)?;

    serde_yaml::from_value(item).map_err(|e| parse_error(format!("{}: {} ({})", path, e, source)))
}

/// Step and assertion types are case-insensitive
fn normalize_type(item: &mut Value, path: &str, source: &str) -> E2eResult<()> {
    match item.get_mut("type") {
        Some(Value::String(kind)) => {
            *kind = kind.to_lowercase();
            Ok(())
        }
        _ => Err(parse_error(format!(
            "'{}.type' must be a string ({})",
            path, source
        ))),
    }
}

fn require_fields(data: &Value, fields: &[&str], context: &str, source: &str) -> E2eResult<()> {
    for field in fields {
        if data.get(*field).is_none() {
            return Err(parse_error(format!(
                "Missing required field '{}' in {} ({})",
                field, context, source
            )));
        }
    }
    Ok(())
}

fn parse_error(message: String) -> E2eError {
    E2eError::ScenarioParse(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::{AssertionKind, Platform};
    use std::io::Write;

    const LOGIN: &str = r#"
meta:
  app: flow-editor
  platform: Unity
  timeout: 120
steps:
  - type: input
    target: username_field
    text: admin
  - type: Click
    target: login_button
  - type: select
    target: theme
    value: 2
  - type: wait
    ms: 500
  - type: screenshot
    description: after login
assert:
  - type: screenshot
    name: login
    description: login form visible
"#;

    #[test]
    fn test_parse_full_scenario() {
        let scenario = parse_scenario_str(LOGIN, "login.yaml").unwrap();
        assert_eq!(scenario.meta.app, "flow-editor");
        assert_eq!(scenario.meta.platform, Platform::Unity);
        assert_eq!(scenario.meta.timeout, 120);
        assert_eq!(scenario.meta.resolution, "1920x1080");
        assert_eq!(scenario.total_steps(), 5);
        assert_eq!(scenario.steps[1].kind(), "click");
        assert_eq!(
            scenario.steps[2],
            Step::Select {
                target: "theme".into(),
                value: "2".into(),
                description: None
            }
        );
        assert_eq!(scenario.assertions[0].kind, AssertionKind::Screenshot);
    }

    #[test]
    fn test_steps_and_assertions_default_empty() {
        let scenario =
            parse_scenario_str("meta:\n  app: a\n  platform: flutter\n", "inline").unwrap();
        assert!(scenario.steps.is_empty());
        assert!(scenario.assertions.is_empty());
        assert_eq!(scenario.meta.timeout, 300);
    }

    #[test]
    fn test_errors_name_the_path() {
        let err = parse_scenario_str(
            "meta:\n  app: a\n  platform: unity\nsteps:\n  - type: click\n",
            "s.yaml",
        )
        .unwrap_err();
        assert!(err.to_string().contains("steps[0]"), "{}", err);

        let err = parse_scenario_str(
            "meta:\n  app: a\n  platform: unity\nsteps:\n  - type: swipe\n    target: x\n",
            "s.yaml",
        )
        .unwrap_err();
        assert!(err.to_string().contains("steps[0]"), "{}", err);

        let err = parse_scenario_str(
            "meta:\n  app: a\n  platform: unity\nassert:\n  - type: text\n",
            "s.yaml",
        )
        .unwrap_err();
        assert!(err.to_string().contains("'name' in assert[0]"), "{}", err);

        let err = parse_scenario_str("meta:\n  app: a\n", "s.yaml").unwrap_err();
        assert!(err.to_string().contains("'platform'"), "{}", err);

        let err = parse_scenario_str("meta:\n  app: a\n  platform: web\n", "s.yaml").unwrap_err();
        assert!(err.to_string().contains("Invalid platform"), "{}", err);
    }

    #[test]
    fn test_rejects_empty_and_non_mapping_documents() {
        assert!(parse_scenario_str("", "empty.yaml")
            .unwrap_err()
            .to_string()
            .contains("Empty scenario"));
        assert!(parse_scenario_str("- a\n- b\n", "list.yaml").is_err());
        assert!(parse_scenario_str("steps: []\n", "nometa.yaml")
            .unwrap_err()
            .to_string()
            .contains("'meta'"));
    }

    #[test]
    fn test_unknown_assertion_type_is_preserved() {
        let scenario = parse_scenario_str(
            "meta:\n  app: a\n  platform: unity\nassert:\n  - type: Audio\n    name: beep\n",
            "s.yaml",
        )
        .unwrap();
        assert_eq!(
            scenario.assertions[0].kind,
            AssertionKind::Other("audio".into())
        );
    }

    #[test]
    fn test_parse_scenario_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("login.yaml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(LOGIN.as_bytes())
            .unwrap();

        let scenario = parse_scenario_file(&path).unwrap();
        assert_eq!(scenario.name(), "login");
        assert_eq!(scenario.source.as_deref(), Some(path.as_path()));

        let txt = dir.path().join("login.txt");
        std::fs::write(&txt, LOGIN).unwrap();
        assert!(parse_scenario_file(&txt).is_err());
        assert!(parse_scenario_file(&dir.path().join("missing.yml")).is_err());
    }
}
