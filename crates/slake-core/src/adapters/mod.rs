//! Build-tool adapters and the registry that selects among them.
//!
//! An adapter is a thin wrapper around one external native build tool. The
//! registry owns selection: explicit `type` wins, otherwise adapters are
//! scored by how many of their recognized configuration keys the project
//! uses and probed in descending score order. Selection logic lives here,
//! never in the adapters themselves.

mod custom;
mod make;
mod source;

pub use custom::CustomAdapter;
pub use make::MakeAdapter;
pub use source::SourceAdapter;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use slake_schema::Target;

use crate::config::{self, ConfigError};
use crate::context::ExecContext;

/// Configuration keys consumed by the orchestration layer itself rather
/// than any adapter: adapter selection, environment overrides, post-clean
/// commands, and the per-target should-build flag.
pub const ORCHESTRATOR_KEYS: &[&str] = &["type", "environment", "post-clean", "build"];

/// Keys every adapter understands through the default phase
/// implementations.
pub const COMMON_KEYS: &[&str] = &["pre-build", "post-build", "max-concurrency"];

/// Errors raised while running adapter phases.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// An external tool exited nonzero.
    #[error("command failed with exit code {code:?}: {command}")]
    CommandFailed {
        /// The command line as executed.
        command: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },

    /// Filesystem failure during a phase.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration failure surfaced while evaluating phase commands.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything an adapter can see about the project it builds: the target,
/// the source tree, the manifest root, and the flat effective
/// configuration.
#[derive(Debug, Clone)]
pub struct ProjectDefinition {
    /// Target the build is for.
    pub target: Target,
    /// The library's pristine source directory.
    pub source_dir: PathBuf,
    /// The manifest root directory.
    pub root: PathBuf,
    /// Effective per-target project configuration.
    pub configuration: Map<String, Value>,
}

impl ProjectDefinition {
    /// Look up a configuration value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.configuration.get(key)
    }

    /// A configuration value that may be a single string or a list of
    /// strings, normalized to a list.
    pub fn command_list(&self, key: &str) -> Vec<String> {
        match self.configuration.get(key) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The fixed template variable set available to phase commands.
    pub fn variables(&self, build_dir: &Path) -> BTreeMap<&'static str, String> {
        let mut vars = BTreeMap::new();
        vars.insert("build_directory", build_dir.display().to_string());
        vars.insert("platform", self.target.platform.identifier().to_string());
        vars.insert("architecture", self.target.architecture.clone());
        vars.insert("root_directory", self.root.display().to_string());
        vars
    }

    /// The command list for `key`, template-expanded against the fixed
    /// variable set.
    ///
    /// # Errors
    ///
    /// Fails on references to unknown template variables.
    pub fn expanded_commands(
        &self,
        key: &str,
        build_dir: &Path,
    ) -> Result<Vec<String>, ConfigError> {
        let vars = self.variables(build_dir);
        self.command_list(key)
            .iter()
            .map(|c| config::expand(c, &vars))
            .collect()
    }

    /// Effective `max-concurrency` clamp for this project, applied to the
    /// context's suggestion.
    pub fn concurrency(&self, suggested: usize) -> usize {
        match self.get("max-concurrency").and_then(Value::as_u64) {
            Some(max) if max > 0 => suggested.min(max as usize),
            _ => suggested,
        }
    }
}

/// One external build tool's integration surface.
///
/// Phases run in order: `setup`, `configure`, `pre_build`, `build`,
/// `post_build`. Any phase error causes the caller to delete the output
/// directory, so phases never need to clean up after themselves.
pub trait ProjectAdapter: Send + Sync {
    /// Stable identifier, matched against the `type` configuration key.
    fn identifier(&self) -> &'static str;

    /// Configuration keys this adapter recognizes. Used both for
    /// capability scoring and for rejecting unknown keys.
    fn configuration_keys(&self) -> Vec<&'static str> {
        COMMON_KEYS.to_vec()
    }

    /// Whether the source tree looks like a project this adapter can
    /// build. May probe the directory.
    fn is_valid_project(&self, definition: &ProjectDefinition) -> bool;

    /// Human-readable requirements missing from this machine, empty when
    /// the adapter can run.
    fn missing_prerequisites(&self, definition: &ProjectDefinition) -> Vec<String>;

    /// One-time preparation before the output directory exists.
    fn setup(&self, definition: &ProjectDefinition, exec: &ExecContext) -> Result<(), AdapterError> {
        let _ = (definition, exec);
        Ok(())
    }

    /// Configure the build for the given output directory.
    fn configure(
        &self,
        definition: &ProjectDefinition,
        exec: &ExecContext,
        build_dir: &Path,
    ) -> Result<(), AdapterError> {
        let _ = (definition, exec, build_dir);
        Ok(())
    }

    /// Run the configured `pre-build` commands.
    fn pre_build(
        &self,
        definition: &ProjectDefinition,
        exec: &ExecContext,
        build_dir: &Path,
    ) -> Result<(), AdapterError> {
        for command in definition.expanded_commands("pre-build", build_dir)? {
            exec.run_shell(&command)?;
        }
        Ok(())
    }

    /// Build and install into the output directory.
    fn build(
        &self,
        definition: &ProjectDefinition,
        exec: &ExecContext,
        build_dir: &Path,
    ) -> Result<(), AdapterError>;

    /// Run the configured `post-build` commands.
    fn post_build(
        &self,
        definition: &ProjectDefinition,
        exec: &ExecContext,
        build_dir: &Path,
    ) -> Result<(), AdapterError> {
        for command in definition.expanded_commands("post-build", build_dir)? {
            exec.run_shell(&command)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for dyn ProjectAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectAdapter")
            .field("identifier", &self.identifier())
            .finish()
    }
}

/// Owns the adapter set and implements selection.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn ProjectAdapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_adapters(vec![
            Box::new(MakeAdapter),
            Box::new(CustomAdapter),
            Box::new(SourceAdapter),
        ])
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<_> = self.adapters.iter().map(|a| a.identifier()).collect();
        f.debug_struct("AdapterRegistry").field("adapters", &ids).finish()
    }
}

impl AdapterRegistry {
    /// Build a registry over an explicit adapter set.
    pub fn with_adapters(adapters: Vec<Box<dyn ProjectAdapter>>) -> Self {
        Self { adapters }
    }

    /// Select the adapter for a project.
    ///
    /// An explicit `type` key selects by identifier and fails hard if that
    /// adapter's prerequisites are unmet. Otherwise adapters are scored by
    /// recognized-key overlap and probed in descending score order; a
    /// valid-but-unsatisfied candidate is logged and skipped so a
    /// lower-scored one can still match.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownAdapterType`] for an unknown explicit type,
    /// [`ConfigError::MissingPrerequisites`] when the explicit choice
    /// cannot run, and [`ConfigError::UnknownProjectType`] when no adapter
    /// matches.
    pub fn select(
        &self,
        definition: &ProjectDefinition,
    ) -> Result<&dyn ProjectAdapter, ConfigError> {
        if let Some(explicit) = definition.get("type").and_then(Value::as_str) {
            let adapter = self
                .adapters
                .iter()
                .find(|a| a.identifier() == explicit)
                .ok_or_else(|| ConfigError::UnknownAdapterType(explicit.to_string()))?;
            let missing = adapter.missing_prerequisites(definition);
            if !missing.is_empty() {
                return Err(ConfigError::MissingPrerequisites {
                    adapter: adapter.identifier(),
                    missing: missing.join(", "),
                });
            }
            return Ok(adapter.as_ref());
        }

        let mut scored: Vec<(usize, &Box<dyn ProjectAdapter>)> = self
            .adapters
            .iter()
            .map(|adapter| {
                let score = adapter
                    .configuration_keys()
                    .iter()
                    .filter(|key| definition.configuration.contains_key(**key))
                    .count();
                (score, adapter)
            })
            .collect();
        scored.sort_by_key(|(score, _)| std::cmp::Reverse(*score));

        for (_, adapter) in scored {
            if !adapter.is_valid_project(definition) {
                continue;
            }
            let missing = adapter.missing_prerequisites(definition);
            if missing.is_empty() {
                return Ok(adapter.as_ref());
            }
            tracing::warn!(
                adapter = adapter.identifier(),
                missing = missing.join(", "),
                "skipping valid adapter with unmet prerequisites"
            );
        }

        Err(ConfigError::UnknownProjectType)
    }

    /// Reject configuration keys recognized by neither the chosen adapter
    /// nor the orchestrator.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnrecognizedKey`] naming the first offender.
    pub fn check_recognized_keys(
        &self,
        adapter: &dyn ProjectAdapter,
        configuration: &Map<String, Value>,
    ) -> Result<(), ConfigError> {
        let recognized = adapter.configuration_keys();
        for key in configuration.keys() {
            if !recognized.contains(&key.as_str()) && !ORCHESTRATOR_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::UnrecognizedKey(key.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(configuration: Value, source_dir: &Path) -> ProjectDefinition {
        ProjectDefinition {
            target: Target::host(),
            source_dir: source_dir.to_path_buf(),
            root: source_dir.to_path_buf(),
            configuration: configuration.as_object().cloned().unwrap(),
        }
    }

    struct FakeAdapter {
        id: &'static str,
        keys: &'static [&'static str],
        valid: bool,
        missing: &'static [&'static str],
    }

    impl ProjectAdapter for FakeAdapter {
        fn identifier(&self) -> &'static str {
            self.id
        }
        fn configuration_keys(&self) -> Vec<&'static str> {
            [COMMON_KEYS, self.keys].concat()
        }
        fn is_valid_project(&self, _: &ProjectDefinition) -> bool {
            self.valid
        }
        fn missing_prerequisites(&self, _: &ProjectDefinition) -> Vec<String> {
            self.missing.iter().map(ToString::to_string).collect()
        }
        fn build(
            &self,
            _: &ProjectDefinition,
            _: &ExecContext,
            _: &Path,
        ) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[test]
    fn explicit_type_selects_by_identifier() {
        let registry = AdapterRegistry::with_adapters(vec![Box::new(FakeAdapter {
            id: "widget",
            keys: &[],
            valid: false,
            missing: &[],
        })]);
        let tmp = tempfile::tempdir().unwrap();
        let def = definition(json!({"type": "widget"}), tmp.path());
        assert_eq!(registry.select(&def).unwrap().identifier(), "widget");

        let def = definition(json!({"type": "gadget"}), tmp.path());
        assert!(matches!(
            registry.select(&def),
            Err(ConfigError::UnknownAdapterType(t)) if t == "gadget"
        ));
    }

    #[test]
    fn explicit_type_with_missing_prerequisites_is_fatal() {
        let registry = AdapterRegistry::with_adapters(vec![Box::new(FakeAdapter {
            id: "widget",
            keys: &[],
            valid: true,
            missing: &["the widget compiler"],
        })]);
        let tmp = tempfile::tempdir().unwrap();
        let def = definition(json!({"type": "widget"}), tmp.path());
        assert!(matches!(
            registry.select(&def),
            Err(ConfigError::MissingPrerequisites { adapter: "widget", .. })
        ));
    }

    #[test]
    fn scoring_prefers_key_overlap_but_skips_unsatisfied() {
        // "rich" recognizes the key in use but can't run; "plain" can.
        let registry = AdapterRegistry::with_adapters(vec![
            Box::new(FakeAdapter {
                id: "plain",
                keys: &[],
                valid: true,
                missing: &[],
            }),
            Box::new(FakeAdapter {
                id: "rich",
                keys: &["widget-args"],
                valid: true,
                missing: &["widgetc"],
            }),
        ]);
        let tmp = tempfile::tempdir().unwrap();
        let def = definition(json!({"widget-args": ["-O2"]}), tmp.path());
        assert_eq!(registry.select(&def).unwrap().identifier(), "plain");
    }

    #[test]
    fn no_valid_adapter_is_unknown_project_type() {
        let registry = AdapterRegistry::with_adapters(vec![Box::new(FakeAdapter {
            id: "widget",
            keys: &[],
            valid: false,
            missing: &[],
        })]);
        let tmp = tempfile::tempdir().unwrap();
        let def = definition(json!({}), tmp.path());
        assert!(matches!(
            registry.select(&def),
            Err(ConfigError::UnknownProjectType)
        ));
    }

    #[test]
    fn unrecognized_keys_are_rejected() {
        let adapter = FakeAdapter {
            id: "widget",
            keys: &["widget-args"],
            valid: true,
            missing: &[],
        };
        let registry = AdapterRegistry::default();
        let config = json!({
            "type": "widget",
            "environment": {},
            "post-clean": [],
            "build": true,
            "widget-args": [],
            "pre-build": []
        });
        registry
            .check_recognized_keys(&adapter, config.as_object().unwrap())
            .unwrap();

        let config = json!({"widget-args": [], "frobnicate": true});
        assert!(matches!(
            registry.check_recognized_keys(&adapter, config.as_object().unwrap()),
            Err(ConfigError::UnrecognizedKey(k)) if k == "frobnicate"
        ));
    }
}
