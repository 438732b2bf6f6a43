//! Makefile projects.

use std::path::Path;

use crate::context::ExecContext;

use super::{AdapterError, COMMON_KEYS, ProjectAdapter, ProjectDefinition};

const MAKEFILE_NAMES: &[&str] = &["Makefile", "GNUmakefile", "makefile"];

/// Thin wrapper around `make` / `make install`.
///
/// The installation prefix is passed under the three spellings seen in the
/// wild (`PREFIX`, `INSTALLPREFIX`, `INSTALL_PREFIX`); Makefiles that
/// honor none of them need a `custom` project configuration instead.
pub struct MakeAdapter;

impl MakeAdapter {
    fn makefile_path(directory: &Path) -> Option<std::path::PathBuf> {
        MAKEFILE_NAMES
            .iter()
            .map(|name| directory.join(name))
            .find(|path| path.is_file())
    }
}

impl ProjectAdapter for MakeAdapter {
    fn identifier(&self) -> &'static str {
        "make"
    }

    fn configuration_keys(&self) -> Vec<&'static str> {
        [COMMON_KEYS, &["make-args", "make-targets", "install-targets"]].concat()
    }

    fn is_valid_project(&self, definition: &ProjectDefinition) -> bool {
        Self::makefile_path(&definition.source_dir).is_some()
    }

    fn missing_prerequisites(&self, _definition: &ProjectDefinition) -> Vec<String> {
        if which::which("make").is_ok() {
            Vec::new()
        } else {
            vec!["make".to_string()]
        }
    }

    fn build(
        &self,
        definition: &ProjectDefinition,
        exec: &ExecContext,
        build_dir: &Path,
    ) -> Result<(), AdapterError> {
        let jobs = definition.concurrency(exec.jobs()).to_string();
        let extra = definition.expanded_commands("make-args", build_dir)?;
        let targets = definition.command_list("make-targets");

        let mut args: Vec<&str> = vec!["-j", &jobs];
        args.extend(extra.iter().map(String::as_str));
        args.extend(targets.iter().map(String::as_str));
        exec.run("make", &args)?;

        let prefix = format!("PREFIX={}", build_dir.display());
        let installprefix = format!("INSTALLPREFIX={}", build_dir.display());
        let install_prefix = format!("INSTALL_PREFIX={}", build_dir.display());
        let install_targets = definition.command_list("install-targets");

        let mut args: Vec<&str> = if install_targets.is_empty() {
            vec!["install"]
        } else {
            install_targets.iter().map(String::as_str).collect()
        };
        args.extend(extra.iter().map(String::as_str));
        args.extend([
            prefix.as_str(),
            installprefix.as_str(),
            install_prefix.as_str(),
        ]);
        exec.run("make", &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use slake_schema::Target;

    #[test]
    fn valid_only_with_a_makefile() {
        let tmp = tempfile::tempdir().unwrap();
        let definition = ProjectDefinition {
            target: Target::host(),
            source_dir: tmp.path().to_path_buf(),
            root: tmp.path().to_path_buf(),
            configuration: Map::new(),
        };
        assert!(!MakeAdapter.is_valid_project(&definition));

        std::fs::write(tmp.path().join("Makefile"), "all:\n").unwrap();
        assert!(MakeAdapter.is_valid_project(&definition));
    }
}
