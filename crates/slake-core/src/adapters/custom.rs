//! Fully custom projects: every phase is an explicit command list.

use std::path::Path;

use crate::context::ExecContext;

use super::{AdapterError, COMMON_KEYS, ProjectAdapter, ProjectDefinition};

/// Runs whatever the manifest says, nothing more.
///
/// Only matches when a `commands` key is present, so it never shadows a
/// real build system during capability scoring.
pub struct CustomAdapter;

impl ProjectAdapter for CustomAdapter {
    fn identifier(&self) -> &'static str {
        "custom"
    }

    fn configuration_keys(&self) -> Vec<&'static str> {
        [COMMON_KEYS, &["commands", "configure-commands"]].concat()
    }

    fn is_valid_project(&self, definition: &ProjectDefinition) -> bool {
        definition.get("commands").is_some()
    }

    fn missing_prerequisites(&self, _definition: &ProjectDefinition) -> Vec<String> {
        Vec::new()
    }

    fn configure(
        &self,
        definition: &ProjectDefinition,
        exec: &ExecContext,
        build_dir: &Path,
    ) -> Result<(), AdapterError> {
        for command in definition.expanded_commands("configure-commands", build_dir)? {
            exec.run_shell(&command)?;
        }
        Ok(())
    }

    fn build(
        &self,
        definition: &ProjectDefinition,
        exec: &ExecContext,
        build_dir: &Path,
    ) -> Result<(), AdapterError> {
        for command in definition.expanded_commands("commands", build_dir)? {
            exec.run_shell(&command)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use slake_schema::Target;

    #[test]
    fn build_runs_expanded_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let build_dir = tmp.path().join("out");
        std::fs::create_dir_all(&build_dir).unwrap();

        let definition = ProjectDefinition {
            target: Target::host(),
            source_dir: tmp.path().to_path_buf(),
            root: tmp.path().to_path_buf(),
            configuration: json!({
                "commands": ["touch {build_directory}/built-{architecture}"]
            })
            .as_object()
            .cloned()
            .unwrap(),
        };
        let exec = ExecContext::new(tmp.path(), Vec::new(), 1);
        CustomAdapter.build(&definition, &exec, &build_dir).unwrap();

        let marker = build_dir.join(format!("built-{}", Target::host().architecture));
        assert!(marker.exists());
    }
}
