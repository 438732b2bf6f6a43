//! The per-library build unit.
//!
//! A [`Library`] binds one manifest entry to one target and owns its
//! directory tree under `<root>/needs/<name>`:
//!
//! ```text
//! needs/<name>/source                      pristine source
//! needs/<name>/build/<platform>/<arch>     build output
//! needs/<name>/build/<platform>/<arch>/slake.status
//! ```
//!
//! The status file records the configuration fingerprint the output was
//! built from. It is written only after every phase has succeeded, so a
//! build directory without a valid status file is never trusted.

use std::path::PathBuf;

use serde_json::Value;
use slake_schema::{BuildStatus, ManifestEntry, Target};

use crate::adapters::{AdapterError, ProjectDefinition};
use crate::config::ConfigError;
use crate::context::{BuildContext, ExecContext};
use crate::fingerprint;
use crate::source::{self, SourceError};

/// Where a library stands relative to its cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// No build output exists for this target.
    Unbuilt,
    /// Output exists but was built from a different configuration.
    OutOfDate,
    /// Output matches the current configuration fingerprint.
    UpToDate,
}

/// Errors raised while building a library.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Source acquisition failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// An adapter phase failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Configuration evaluation or adapter selection failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem failure outside any phase.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The entry declares no source and no adapter can run without one.
    #[error("no source is declared")]
    MissingSource,
}

/// One manifest entry bound to one build target.
#[derive(Debug)]
pub struct Library {
    name: String,
    entry: ManifestEntry,
    target: Target,
}

impl Library {
    /// Bind `entry` to `target` under the given name.
    pub fn new(name: impl Into<String>, entry: ManifestEntry, target: Target) -> Self {
        Self {
            name: name.into(),
            entry,
            target,
        }
    }

    /// The library's manifest name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The target this unit builds for.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The library's directory under the needs tree.
    pub fn directory(&self, ctx: &BuildContext) -> PathBuf {
        ctx.library_dir(&self.name)
    }

    /// The pristine source directory.
    pub fn source_directory(&self, ctx: &BuildContext) -> PathBuf {
        self.directory(ctx).join("source")
    }

    /// The build output directory for this target.
    pub fn build_directory(&self, ctx: &BuildContext) -> PathBuf {
        self.directory(ctx)
            .join("build")
            .join(self.target.platform.identifier())
            .join(&self.target.architecture)
    }

    fn status_path(&self, ctx: &BuildContext) -> PathBuf {
        self.build_directory(ctx).join("slake.status")
    }

    /// Whether this entry wants a build at all for this target. Entries can
    /// opt out per target with a `build: false` project setting.
    pub fn should_build(&self, _ctx: &BuildContext) -> Result<bool, ConfigError> {
        let configuration = fingerprint::project_configuration(&self.entry, &self.target)?;
        Ok(configuration
            .get("build")
            .and_then(Value::as_bool)
            .unwrap_or(true))
    }

    /// Where this library stands relative to its build cache, ignoring the
    /// force flag and development mode.
    pub fn state(&self, ctx: &BuildContext) -> Result<BuildState, ConfigError> {
        let status_path = self.status_path(ctx);
        let Ok(text) = std::fs::read_to_string(&status_path) else {
            return Ok(BuildState::Unbuilt);
        };
        let Ok(status) = serde_json::from_str::<BuildStatus>(&text) else {
            return Ok(BuildState::OutOfDate);
        };
        let expected = fingerprint::configuration_fingerprint(&self.entry, &self.target)?;
        match status.fingerprint() {
            Ok(recorded) if recorded == expected => Ok(BuildState::UpToDate),
            _ => Ok(BuildState::OutOfDate),
        }
    }

    /// Whether the existing output can be trusted for this configuration.
    ///
    /// Forced builds and development mode always report stale; entries that
    /// opt out of building always report fresh.
    pub fn is_up_to_date(&self, ctx: &BuildContext) -> Result<bool, ConfigError> {
        if ctx.force_build() || ctx.development_mode(&self.name) {
            return Ok(false);
        }
        if !self.should_build(ctx)? {
            return Ok(true);
        }
        Ok(self.state(ctx)? == BuildState::UpToDate)
    }

    /// Build this library from scratch for its target.
    ///
    /// The sequence is: refresh the source (skipped in development mode
    /// when a source tree already exists), wipe the output directory, run
    /// any `post-clean` commands, then drive the selected adapter through
    /// its phases. The status file is written last; any phase error deletes
    /// the output directory before propagating.
    ///
    /// # Errors
    ///
    /// Propagates source, configuration, and adapter failures.
    pub async fn build(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        let source_dir = self.source_directory(ctx);
        let development = ctx.development_mode(&self.name);

        match self.entry.source_spec() {
            Some(spec) => {
                if !development || !source_dir.is_dir() {
                    let backend = source::from_spec(&spec, &self.directory(ctx), ctx.root());
                    backend.refresh(ctx).await?;
                }
            }
            None => return Err(BuildError::MissingSource),
        }

        let configuration = fingerprint::project_configuration(&self.entry, &self.target)?;
        let definition = ProjectDefinition {
            target: self.target.clone(),
            source_dir: source_dir.clone(),
            root: ctx.root().to_path_buf(),
            configuration,
        };
        let adapter = ctx.registry().select(&definition)?;
        ctx.registry()
            .check_recognized_keys(adapter, &definition.configuration)?;

        let build_dir = self.build_directory(ctx);
        let env = self.environment_overrides(&definition, &build_dir)?;
        let jobs = definition.concurrency(ctx.concurrency());
        let exec = ExecContext::new(&source_dir, env, jobs);

        if build_dir.exists() {
            std::fs::remove_dir_all(&build_dir)?;
        }
        for command in definition.expanded_commands("post-clean", &build_dir)? {
            exec.run_shell(&command)?;
        }
        std::fs::create_dir_all(&build_dir)?;

        tracing::info!(
            library = self.name,
            target = %self.target,
            adapter = adapter.identifier(),
            "building"
        );

        let phases = || -> Result<(), BuildError> {
            adapter.setup(&definition, &exec)?;
            adapter.configure(&definition, &exec, &build_dir)?;
            adapter.pre_build(&definition, &exec, &build_dir)?;
            adapter.build(&definition, &exec, &build_dir)?;
            adapter.post_build(&definition, &exec, &build_dir)?;
            Ok(())
        };
        if let Err(error) = phases() {
            // A partial output directory must never look like a build.
            let _ = std::fs::remove_dir_all(&build_dir);
            return Err(error);
        }

        let fingerprint = fingerprint::configuration_fingerprint(&self.entry, &self.target)?;
        let status = BuildStatus::new(fingerprint);
        let text = serde_json::to_string(&status).map_err(std::io::Error::other)?;
        std::fs::write(self.status_path(ctx), text)?;
        Ok(())
    }

    /// The configuration fingerprint this unit would record on success.
    pub fn fingerprint(&self) -> Result<slake_schema::Fingerprint, ConfigError> {
        fingerprint::configuration_fingerprint(&self.entry, &self.target)
    }

    /// Environment overrides for every phase of this build. Values go
    /// through template expansion with the standard variable set plus
    /// `current`, bound to the variable's value in the invoking process.
    fn environment_overrides(
        &self,
        definition: &ProjectDefinition,
        build_dir: &std::path::Path,
    ) -> Result<Vec<(String, String)>, ConfigError> {
        let Some(Value::Object(overrides)) = definition.get("environment") else {
            return Ok(Vec::new());
        };
        let mut env = Vec::with_capacity(overrides.len());
        for (key, value) in overrides {
            let Some(template) = value.as_str() else {
                continue;
            };
            let mut vars = definition.variables(build_dir);
            vars.insert("current", std::env::var(key).unwrap_or_default());
            env.push((key.clone(), crate::config::expand(template, &vars)?));
        }
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextOptions;
    use serde_json::json;

    fn entry(value: serde_json::Value) -> ManifestEntry {
        serde_json::from_value(value).unwrap()
    }

    fn context(root: &std::path::Path) -> BuildContext {
        BuildContext::new(root.to_path_buf(), ContextOptions::default())
    }

    fn directory_entry(root: &std::path::Path) -> ManifestEntry {
        let origin = root.join("vendor/lib");
        std::fs::create_dir_all(origin.join("include")).unwrap();
        std::fs::write(origin.join("include/lib.h"), "#pragma once\n").unwrap();
        entry(json!({
            "directory": "vendor/lib",
            "project": {
                "commands": ["mkdir -p {build_directory}/lib", "touch {build_directory}/lib/out.a"]
            }
        }))
    }

    #[tokio::test]
    async fn build_runs_phases_and_records_status() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let library = Library::new("lib", directory_entry(tmp.path()), Target::host());

        assert_eq!(library.state(&ctx).unwrap(), BuildState::Unbuilt);
        library.build(&ctx).await.unwrap();

        let build_dir = library.build_directory(&ctx);
        assert!(build_dir.join("lib/out.a").is_file());
        assert_eq!(library.state(&ctx).unwrap(), BuildState::UpToDate);
        assert!(library.is_up_to_date(&ctx).unwrap());
    }

    #[tokio::test]
    async fn failed_phase_leaves_no_output_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let origin = tmp.path().join("vendor/bad");
        std::fs::create_dir_all(&origin).unwrap();
        let library = Library::new(
            "bad",
            entry(json!({
                "directory": "vendor/bad",
                "project": {"commands": ["exit 1"]}
            })),
            Target::host(),
        );

        assert!(library.build(&ctx).await.is_err());
        assert!(!library.build_directory(&ctx).exists());
        assert_eq!(library.state(&ctx).unwrap(), BuildState::Unbuilt);
    }

    #[tokio::test]
    async fn configuration_change_invalidates_the_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let library = Library::new("lib", directory_entry(tmp.path()), Target::host());
        library.build(&ctx).await.unwrap();

        let changed = entry(json!({
            "directory": "vendor/lib",
            "project": {"commands": ["mkdir -p {build_directory}/lib"]}
        }));
        let library = Library::new("lib", changed, Target::host());
        assert_eq!(library.state(&ctx).unwrap(), BuildState::OutOfDate);
        assert!(!library.is_up_to_date(&ctx).unwrap());
    }

    #[test]
    fn build_false_reports_fresh_without_output() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let library = Library::new(
            "lib",
            entry(json!({"directory": "x", "project": {"build": false}})),
            Target::host(),
        );
        assert!(!library.should_build(&ctx).unwrap());
        assert!(library.is_up_to_date(&ctx).unwrap());
    }

    #[test]
    fn force_build_reports_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = BuildContext::new(
            tmp.path().to_path_buf(),
            ContextOptions {
                force_build: true,
                ..ContextOptions::default()
            },
        );
        let library = Library::new(
            "lib",
            entry(json!({"directory": "x", "project": {"commands": ["true"]}})),
            Target::host(),
        );
        assert!(!library.is_up_to_date(&ctx).unwrap());
    }

    #[tokio::test]
    async fn environment_overrides_reach_phase_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let origin = tmp.path().join("vendor/env");
        std::fs::create_dir_all(&origin).unwrap();
        let library = Library::new(
            "env",
            entry(json!({
                "directory": "vendor/env",
                "project": {
                    "environment": {"SLAKE_FLAVOR": "salted"},
                    "commands": ["test \"$SLAKE_FLAVOR\" = salted"]
                }
            })),
            Target::host(),
        );
        library.build(&ctx).await.unwrap();
    }
}
