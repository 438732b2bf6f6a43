//! Conditional configuration evaluation and string templating.
//!
//! A manifest entry's `project` configuration may contain a `conditionals`
//! object keyed by `platform` or `architecture`. Each key maps case labels
//! to override objects; every matching case is merged into the
//! configuration and evaluation repeats until no `conditionals` key
//! remains, so overrides may themselves nest further conditionals.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use slake_schema::Target;

/// Evaluation never loops more than this many times. An override that keeps
/// reintroducing an equivalent conditional would otherwise never converge,
/// and that is a manifest bug, not something to spin on.
const MAX_CONDITIONAL_PASSES: usize = 64;

/// Configuration errors. All of these are fatal to the current run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A `conditionals` object used a key other than `platform` or
    /// `architecture`.
    #[error("unknown conditional key: {0:?}")]
    UnknownConditionalKey(String),

    /// A `conditionals` object or one of its cases was not a JSON object.
    #[error("malformed conditionals: {0}")]
    MalformedConditional(String),

    /// Conditional evaluation failed to reach a fixed point.
    #[error("conditionals did not converge after {MAX_CONDITIONAL_PASSES} passes")]
    ConditionalOverflow,

    /// A configuration string referenced a template variable that does not
    /// exist in this context.
    #[error("unknown template variable: {{{0}}}")]
    UnknownVariable(String),

    /// A configuration key is recognized by neither the selected adapter
    /// nor the orchestrator.
    #[error("unrecognized configuration key: {0:?}")]
    UnrecognizedKey(String),

    /// The configuration named an adapter type that is not registered.
    #[error("unknown project type: {0:?}")]
    UnknownAdapterType(String),

    /// No registered adapter recognized the project.
    #[error("unknown project type")]
    UnknownProjectType,

    /// The selected adapter cannot run on this machine.
    #[error("adapter {adapter:?} is missing prerequisites: {missing}")]
    MissingPrerequisites {
        /// The adapter that was selected.
        adapter: &'static str,
        /// Human-readable list of what is missing.
        missing: String,
    },
}

/// Resolve all `conditionals` blocks in `configuration` against `target`,
/// returning the flat effective configuration.
///
/// A case label matches when it equals one of the target's candidate values
/// (the platform identifier, plus `host` and the raw OS identifier for host
/// targets, or the architecture string for `architecture` conditionals),
/// when it is `*`, or when it is `!value` and no candidate equals `value`.
/// Matching overrides merge in declaration order, later wins.
///
/// # Errors
///
/// Fails on unknown conditional keys, malformed conditional objects, or
/// when evaluation exceeds the pass cap.
pub fn evaluate_conditionals(
    configuration: &Map<String, Value>,
    target: &Target,
) -> Result<Map<String, Value>, ConfigError> {
    let mut current = configuration.clone();

    for _ in 0..MAX_CONDITIONAL_PASSES {
        let Some(conditionals) = current.remove("conditionals") else {
            return Ok(current);
        };
        let Value::Object(conditionals) = conditionals else {
            return Err(ConfigError::MalformedConditional(
                "conditionals must be an object".into(),
            ));
        };

        for (key, cases) in &conditionals {
            let candidates: Vec<String> = match key.as_str() {
                "platform" => target
                    .platform
                    .condition_candidates()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                "architecture" => vec![target.architecture.clone()],
                other => return Err(ConfigError::UnknownConditionalKey(other.to_string())),
            };

            let Value::Object(cases) = cases else {
                return Err(ConfigError::MalformedConditional(format!(
                    "cases for {key:?} must be an object"
                )));
            };

            for (label, overrides) in cases {
                if !label_matches(label, &candidates) {
                    continue;
                }
                let Value::Object(overrides) = overrides else {
                    return Err(ConfigError::MalformedConditional(format!(
                        "override for case {label:?} must be an object"
                    )));
                };
                for (k, v) in overrides {
                    current.insert(k.clone(), v.clone());
                }
            }
        }
    }

    Err(ConfigError::ConditionalOverflow)
}

fn label_matches(label: &str, candidates: &[String]) -> bool {
    if label == "*" {
        return true;
    }
    if let Some(negated) = label.strip_prefix('!') {
        return !candidates.iter().any(|c| c == negated);
    }
    candidates.iter().any(|c| c == label)
}

/// Expand `{variable}` references in a configuration string against a fixed
/// variable set. `{{` and `}}` escape literal braces.
///
/// # Errors
///
/// Fails on references to variables absent from `variables`, and on
/// unbalanced braces.
pub fn expand(template: &str, variables: &BTreeMap<&str, String>) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(ConfigError::UnknownVariable(name)),
                    }
                }
                match variables.get(name.as_str()) {
                    Some(value) => out.push_str(value),
                    None => return Err(ConfigError::UnknownVariable(name)),
                }
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

/// Serialize a JSON value with all object keys recursively sorted.
///
/// Fingerprints hash this form so that key order in the manifest never
/// affects the digest.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, value)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
