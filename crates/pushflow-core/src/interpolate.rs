//! `((var))` substitution
//!
//! Applied to the raw manifest text before it is deserialized, so a
//! variable can stand in for any scalar.

use crate::error::{Result, ValidationError};
use regex::{Captures, Regex};
use std::collections::HashMap;

const VARIABLE_PATTERN: &str = r"\(\(([A-Za-z0-9_.\-]+)\)\)";

fn variable_regex() -> Result<Regex> {
    Regex::new(VARIABLE_PATTERN).map_err(|e| ValidationError::Pattern(e.to_string()))
}

/// Replace every `((name))` in `input` with its value from `vars`.
///
/// Fails on the first variable that has no value.
pub fn interpolate(input: &str, vars: &HashMap<String, String>) -> Result<String> {
    let re = variable_regex()?;
    let mut missing: Option<String> = None;

    let output = re.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ValidationError::UndefinedVariable { name }),
        None => Ok(output.into_owned()),
    }
}

/// Names referenced by `input`, in order of first appearance.
pub fn referenced_variables(input: &str) -> Result<Vec<String>> {
    let re = variable_regex()?;
    let mut names: Vec<String> = Vec::new();
    for caps in re.captures_iter(input) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_interpolate_replaces_all() {
        let text = "name: ((app))\ninstances: ((count))\nroute: ((app)).example.com";
        let out = interpolate(text, &vars(&[("app", "web"), ("count", "3")])).unwrap();
        assert_eq!(out, "name: web\ninstances: 3\nroute: web.example.com");
    }

    #[test]
    fn test_interpolate_missing_variable() {
        let err = interpolate("name: ((app))", &HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UndefinedVariable {
                name: "app".to_string()
            }
        );
    }

    #[test]
    fn test_text_without_variables_is_unchanged() {
        let text = "command: echo (hello)";
        assert_eq!(interpolate(text, &HashMap::new()).unwrap(), text);
    }

    #[test]
    fn test_referenced_variables() {
        assert_eq!(
            referenced_variables("((a)) ((b.c)) ((a))").unwrap(),
            vec!["a".to_string(), "b.c".to_string()]
        );
    }
}
