//! Header-only / raw-source projects that need no build tool at all.

use std::path::Path;

use crate::context::ExecContext;

use super::{AdapterError, COMMON_KEYS, ProjectAdapter, ProjectDefinition};

/// Copies source headers into the output tree verbatim.
///
/// The `source-directory` key names the subtree to publish (default
/// `include` if present, else the whole source tree). Always valid, so it
/// acts as the lowest-scored fallback during adapter selection.
pub struct SourceAdapter;

impl ProjectAdapter for SourceAdapter {
    fn identifier(&self) -> &'static str {
        "source"
    }

    fn configuration_keys(&self) -> Vec<&'static str> {
        [COMMON_KEYS, &["source-directory"]].concat()
    }

    fn is_valid_project(&self, _definition: &ProjectDefinition) -> bool {
        true
    }

    fn missing_prerequisites(&self, _definition: &ProjectDefinition) -> Vec<String> {
        Vec::new()
    }

    fn build(
        &self,
        definition: &ProjectDefinition,
        _exec: &ExecContext,
        build_dir: &Path,
    ) -> Result<(), AdapterError> {
        let origin = match definition.get("source-directory").and_then(|v| v.as_str()) {
            Some(sub) => definition.source_dir.join(sub),
            None => {
                let include = definition.source_dir.join("include");
                if include.is_dir() {
                    include
                } else {
                    definition.source_dir.clone()
                }
            }
        };

        let destination = build_dir.join("include");
        std::fs::create_dir_all(&destination)?;
        fs_extra::dir::copy(
            &origin,
            &destination,
            &fs_extra::dir::CopyOptions::new().content_only(true),
        )
        .map_err(|e| {
            AdapterError::Io(std::io::Error::other(format!(
                "copying {} failed: {e}",
                origin.display()
            )))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use slake_schema::Target;

    #[test]
    fn publishes_include_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("source");
        std::fs::create_dir_all(src.join("include/widget")).unwrap();
        std::fs::write(src.join("include/widget/widget.h"), "#pragma once\n").unwrap();

        let build_dir = tmp.path().join("out");
        std::fs::create_dir_all(&build_dir).unwrap();

        let definition = ProjectDefinition {
            target: Target::host(),
            source_dir: src.clone(),
            root: tmp.path().to_path_buf(),
            configuration: Map::new(),
        };
        let exec = ExecContext::new(&src, Vec::new(), 1);
        SourceAdapter.build(&definition, &exec, &build_dir).unwrap();

        assert!(build_dir.join("include/widget/widget.h").exists());
    }
}
