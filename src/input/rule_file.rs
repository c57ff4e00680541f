//! Rule file loading.
//!
//! Two formats are understood:
//! - `*.json`: `{"rules": [{"priority": 50, "rule": "in:allow tcp 22", "description": "ssh"}]}`
//! - anything else: one rule per line, see [`parse_text_rules`].

use crate::error::RuleError;
use crate::models::{checked_priority, SecurityRule, DEFAULT_PRIORITY, MAX_PRIORITY};
use crate::processing::SecurityRuleSet;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of a JSON rule file.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct RuleFile {
    pub rules: Vec<SecurityRule>,
}

/// Parse a JSON rule file. Errors name the JSON path of the bad value.
pub fn parse_json_rules(json: &str, path: &str) -> Result<RuleFile, RuleError> {
    let mut deserializer = serde_json::Deserializer::from_str(json);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| RuleError::RuleFile {
        path: path.to_string(),
        message: format!("path={} error={}", e.path(), e.inner()),
    })
}

/// Parse the plain text rule format.
///
/// ```text
/// # comment
/// 100: in:deny 10.0.0.1 tcp 22   # jump host
/// in:allow tcp 22,80,443
/// ```
///
/// A leading `<n>:` sets the priority. Otherwise rules get descending
/// priorities from 100 in file order, never below 1. Text after `#` becomes
/// the rule description.
pub fn parse_text_rules(text: &str) -> Result<SecurityRuleSet, RuleError> {
    let mut rules = SecurityRuleSet::default();
    let mut next_priority = MAX_PRIORITY;

    for (i, line) in text.lines().enumerate() {
        let (body, description) = match line.split_once('#') {
            Some((body, comment)) => (body.trim(), comment.trim()),
            None => (line.trim(), ""),
        };
        if body.is_empty() {
            continue;
        }
        let at_line = |source: RuleError| RuleError::Line {
            line: i + 1,
            source: Box::new(source),
        };

        let (priority, rule_text) = split_priority(body).map_err(at_line)?;
        let priority = priority.unwrap_or(next_priority);
        next_priority = next_priority.saturating_sub(1).max(DEFAULT_PRIORITY);

        let rule = SecurityRule::parse(rule_text)
            .map_err(at_line)?
            .with_priority(priority)
            .with_description(description);
        rules.push(rule);
    }
    Ok(rules)
}

fn split_priority(body: &str) -> Result<(Option<u8>, &str), RuleError> {
    let Some((head, rest)) = body.split_once(char::is_whitespace) else {
        return Ok((None, body));
    };
    let Some(number) = head.strip_suffix(':') else {
        return Ok((None, body));
    };
    let Ok(value) = number.parse::<i64>() else {
        return Ok((None, body));
    };
    Ok((Some(checked_priority(value)?), rest.trim()))
}

/// Read a rule file, picking the format from the extension.
pub fn read_rule_file(path: &str) -> Result<SecurityRuleSet, RuleError> {
    if !Path::new(path).exists() {
        return Err(RuleError::RuleFile {
            path: path.to_string(),
            message: "file does not exist".to_string(),
        });
    }
    log::info!("Reading rules from: {path}");
    let text = std::fs::read_to_string(path).map_err(|e| RuleError::RuleFile {
        path: path.to_string(),
        message: e.to_string(),
    })?;

    let rules = match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("json") => SecurityRuleSet::new(parse_json_rules(&text, path)?.rules),
        _ => parse_text_rules(&text).map_err(|e| {
            log::error!("Error parsing {path}: {e}");
            e
        })?,
    };
    log::info!("# Got rule count = {}", rules.len());
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_rule_file_json() {
        let rules = read_rule_file("src/tests/test_data/rules_01.json")
            .expect("Error reading rule file");
        assert_eq!(rules.len(), 5, "Expected 5 rules in test sample");
        let first = rules.iter().next().unwrap();
        assert_eq!(first.to_string(), "in:allow any");
        assert_eq!(first.priority, 1);
        assert_eq!(first.description, "default");
    }

    #[test]
    fn test_read_rule_file_text() {
        let rules = read_rule_file("src/tests/test_data/rules_02.txt")
            .expect("Error reading rule file");
        let got: Vec<(u8, String, String)> = rules
            .iter()
            .map(|r| (r.priority, r.to_string(), r.description.clone()))
            .collect();
        assert_eq!(
            got,
            vec![
                (
                    100,
                    "in:deny 10.0.0.1/32 tcp 22".to_string(),
                    "jump host".to_string()
                ),
                (
                    99,
                    "in:allow tcp 22,80,443".to_string(),
                    "public services".to_string()
                ),
                (98, "in:allow 10.0.0.0/8 tcp 8080".to_string(), String::new()),
                (97, "out:allow any".to_string(), String::new()),
            ]
        );
        assert_eq!(rules.iter().next().unwrap().action, Action::Deny);
    }

    #[test]
    fn test_read_rule_file_missing() {
        let err = read_rule_file("src/tests/test_data/no_such_file.json").unwrap_err();
        assert!(matches!(err, RuleError::RuleFile { .. }));
    }

    #[test]
    fn test_json_error_reports_path() {
        let err = read_rule_file("src/tests/test_data/rules_bad.json").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("rules[1]"), "no json path in: {msg}");
        assert!(msg.contains("rules_bad.json"), "no file name in: {msg}");
    }

    #[test]
    fn test_json_priority_out_of_range() {
        let json = r#"{"rules": [{"priority": 200, "rule": "in:allow tcp 22"}]}"#;
        let err = parse_json_rules(json, "inline").unwrap_err();
        assert!(err.to_string().contains("invalid priority 200"));
    }

    #[test]
    fn test_text_rules_priority_floor() {
        let text = "in:allow tcp 1\n".repeat(102);
        let rules = parse_text_rules(&text).unwrap();
        assert_eq!(rules.iter().last().unwrap().priority, 1);
        assert_eq!(rules.iter().nth(99).unwrap().priority, 1);
        assert_eq!(rules.iter().nth(98).unwrap().priority, 2);
    }

    #[test]
    fn test_text_rules_errors_carry_line() {
        let err = parse_text_rules("# header\nin:allow tcp 22\nin:allow tcp 0\n").unwrap_err();
        assert_eq!(
            err,
            RuleError::Line {
                line: 3,
                source: Box::new(RuleError::InvalidPort("0".to_string())),
            }
        );

        let err = parse_text_rules("250: in:allow any").unwrap_err();
        assert_eq!(
            err,
            RuleError::Line {
                line: 1,
                source: Box::new(RuleError::InvalidPriority(250)),
            }
        );
    }
}
