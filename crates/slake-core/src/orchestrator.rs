//! The top-level build orchestrator.
//!
//! Owns one manifest and drives whole-tree operations: satisfying a set of
//! libraries for a target, synthesizing universal builds, and answering
//! path queries (compiler flags, build directories) against the result.
//!
//! The manifest text is kept raw and re-rendered per target, because
//! rendering substitutes `{platform}` and `{architecture}` into entry
//! values and those differ between the targets of one universal build.

use std::path::PathBuf;

use slake_schema::{Manifest, Target};

use crate::context::BuildContext;
use crate::graph::{self, GraphError};
use crate::library::{BuildError, Library};
use crate::universal::{UniversalBinary, UniversalError};

/// The manifest file name looked for at the tree root.
pub const MANIFEST_FILE: &str = "needs.json";

/// Errors raised by orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The manifest could not be read.
    #[error("unable to read manifest: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest could not be parsed.
    #[error("malformed manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// A universal build declares an invalid target.
    #[error("invalid target in universal build {name}: {reason}")]
    InvalidTarget {
        /// The universal build's name.
        name: String,
        /// What was wrong with the declaration.
        reason: String,
    },

    /// A name that is not in the manifest.
    #[error("{0} is not in the manifest")]
    Unknown(String),

    /// Dependency resolution failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A library build failed.
    #[error("building {library} failed: {source}")]
    Build {
        /// The library that failed.
        library: String,
        /// The underlying failure.
        source: BuildError,
    },

    /// Universal synthesis failed.
    #[error(transparent)]
    Universal(#[from] UniversalError),

    /// Configuration evaluation failed outside a build.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// What paths queries are answered against: one target's outputs, or a
/// universal build's merged tree.
#[derive(Debug, Clone)]
pub enum Selection {
    /// A single build target.
    Target(Target),
    /// A universal build, by manifest name.
    Universal(String),
}

/// One manifest plus the context needed to satisfy it.
#[derive(Debug)]
pub struct Orchestrator {
    ctx: BuildContext,
    manifest_text: String,
}

impl Orchestrator {
    /// An orchestrator over in-memory manifest text.
    pub fn new(ctx: BuildContext, manifest_text: impl Into<String>) -> Self {
        Self {
            ctx,
            manifest_text: manifest_text.into(),
        }
    }

    /// Open the manifest at the context root (`<root>/needs.json`).
    ///
    /// # Errors
    ///
    /// Fails when the manifest file cannot be read.
    pub fn open(ctx: BuildContext) -> Result<Self, OrchestratorError> {
        let path = ctx.root().join(MANIFEST_FILE);
        let manifest_text = std::fs::read_to_string(&path)?;
        Ok(Self {
            ctx,
            manifest_text,
        })
    }

    /// The build context.
    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    /// The manifest rendered for `target` (or unrendered when `None`).
    ///
    /// # Errors
    ///
    /// Fails on malformed manifest text.
    pub fn manifest_for(&self, target: Option<&Target>) -> Result<Manifest, OrchestratorError> {
        Ok(Manifest::parse(&self.manifest_text, target)?)
    }

    /// Build every library matching `filters` (plus dependencies) for
    /// `target`, in dependency order, skipping up-to-date ones. Stops at
    /// the first failure.
    ///
    /// # Errors
    ///
    /// Propagates resolution and build failures.
    pub async fn satisfy(
        &self,
        filters: &[glob::Pattern],
        target: &Target,
    ) -> Result<(), OrchestratorError> {
        let manifest = self.manifest_for(Some(target))?;
        for name in graph::resolve(&manifest, filters)? {
            let entry = manifest
                .libraries
                .get(&name)
                .ok_or_else(|| OrchestratorError::Unknown(name.clone()))?;
            let library = Library::new(&name, entry.clone(), target.clone());
            if library.is_up_to_date(&self.ctx)? {
                tracing::info!(library = name, target = %target, "up to date");
                continue;
            }
            library
                .build(&self.ctx)
                .await
                .map_err(|source| OrchestratorError::Build {
                    library: name.clone(),
                    source,
                })?;
            tracing::info!(library = name, target = %target, "built");
        }
        Ok(())
    }

    /// Satisfy every target of the named universal build, then merge each
    /// resolved library's per-target outputs into its universal tree.
    ///
    /// # Errors
    ///
    /// Propagates resolution, build, and synthesis failures.
    pub async fn satisfy_universal(
        &self,
        name: &str,
        filters: &[glob::Pattern],
    ) -> Result<(), OrchestratorError> {
        let targets = self.universal_targets(name)?;
        for target in &targets {
            self.satisfy(filters, target).await?;
        }

        let manifest = self.manifest_for(targets.first())?;
        for library in graph::resolve(&manifest, filters)? {
            let universal = self.universal(name, &library, &targets)?;
            if universal.is_up_to_date(&self.ctx)? {
                tracing::info!(universal = name, library, "up to date");
                continue;
            }
            universal.synthesize(&self.ctx)?;
            tracing::info!(universal = name, library, "synthesized");
        }
        Ok(())
    }

    /// `-I` include directories for the selected libraries, in build
    /// order.
    ///
    /// # Errors
    ///
    /// Propagates resolution failures.
    pub fn include_paths(
        &self,
        filters: &[glob::Pattern],
        selection: &Selection,
    ) -> Result<Vec<PathBuf>, OrchestratorError> {
        self.selected_directories(filters, selection, "include")
    }

    /// `-L` library directories for the selected libraries, in build
    /// order.
    ///
    /// # Errors
    ///
    /// Propagates resolution failures.
    pub fn library_paths(
        &self,
        filters: &[glob::Pattern],
        selection: &Selection,
    ) -> Result<Vec<PathBuf>, OrchestratorError> {
        self.selected_directories(filters, selection, "lib")
    }

    /// The build output directory for one library under a selection.
    ///
    /// # Errors
    ///
    /// Fails when the library or universal build is not in the manifest.
    pub fn build_directory(
        &self,
        library: &str,
        selection: &Selection,
    ) -> Result<PathBuf, OrchestratorError> {
        match selection {
            Selection::Target(target) => {
                let manifest = self.manifest_for(Some(target))?;
                let entry = manifest
                    .libraries
                    .get(library)
                    .ok_or_else(|| OrchestratorError::Unknown(library.to_string()))?;
                Ok(Library::new(library, entry.clone(), target.clone())
                    .build_directory(&self.ctx))
            }
            Selection::Universal(name) => {
                let targets = self.universal_targets(name)?;
                let universal = self.universal(name, library, &targets)?;
                Ok(universal.output_directory(&self.ctx)?)
            }
        }
    }

    fn selected_directories(
        &self,
        filters: &[glob::Pattern],
        selection: &Selection,
        subdirectory: &str,
    ) -> Result<Vec<PathBuf>, OrchestratorError> {
        let render_target = match selection {
            Selection::Target(target) => Some(target.clone()),
            Selection::Universal(name) => self.universal_targets(name)?.into_iter().next(),
        };
        let manifest = self.manifest_for(render_target.as_ref())?;
        graph::resolve(&manifest, filters)?
            .iter()
            .map(|library| {
                self.build_directory(library, selection)
                    .map(|dir| dir.join(subdirectory))
            })
            .collect()
    }

    /// The declared targets of the named universal build.
    fn universal_targets(&self, name: &str) -> Result<Vec<Target>, OrchestratorError> {
        let manifest = self.manifest_for(None)?;
        let spec = manifest
            .universal_binaries
            .get(name)
            .ok_or_else(|| OrchestratorError::Unknown(name.to_string()))?;
        spec.targets()
            .map_err(|reason| OrchestratorError::InvalidTarget {
                name: name.to_string(),
                reason,
            })
    }

    /// One library's universal build over the given targets. Each
    /// contributor gets the manifest rendered for its own target.
    fn universal(
        &self,
        name: &str,
        library: &str,
        targets: &[Target],
    ) -> Result<UniversalBinary, OrchestratorError> {
        let mut contributors = Vec::with_capacity(targets.len());
        for target in targets {
            let manifest = self.manifest_for(Some(target))?;
            let entry = manifest
                .libraries
                .get(library)
                .ok_or_else(|| OrchestratorError::Unknown(library.to_string()))?;
            contributors.push(Library::new(library, entry.clone(), target.clone()));
        }
        Ok(UniversalBinary::new(name, contributors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextOptions;
    use std::path::Path;

    fn orchestrator(root: &Path, manifest: &str) -> Orchestrator {
        let ctx = BuildContext::new(root.to_path_buf(), ContextOptions::default());
        Orchestrator::new(ctx, manifest)
    }

    fn seed_source(root: &Path) {
        std::fs::create_dir_all(root.join("vendor/lib")).unwrap();
    }

    const MANIFEST: &str = r#"{
        "libraries": {
            "greeter": {
                "directory": "vendor/lib",
                "dependencies": "base",
                "project": {
                    "commands": [
                        "mkdir -p {build_directory}/include",
                        "printf greeter > {build_directory}/include/greeter.h"
                    ]
                }
            },
            "base": {
                "directory": "vendor/lib",
                "project": {
                    "commands": [
                        "mkdir -p {build_directory}/include {build_directory}/lib",
                        "printf base > {build_directory}/include/base.h"
                    ]
                }
            }
        }
    }"#;

    #[tokio::test]
    async fn satisfy_builds_in_dependency_order_and_caches() {
        let tmp = tempfile::tempdir().unwrap();
        seed_source(tmp.path());
        let orchestrator = orchestrator(tmp.path(), MANIFEST);
        let target = Target::host();

        orchestrator.satisfy(&[], &target).await.unwrap();
        let selection = Selection::Target(target.clone());
        let base = orchestrator.build_directory("base", &selection).unwrap();
        let greeter = orchestrator.build_directory("greeter", &selection).unwrap();
        assert!(base.join("include/base.h").is_file());
        assert!(greeter.join("include/greeter.h").is_file());

        // A second pass finds everything cached and touches nothing.
        let before = std::fs::metadata(base.join("slake.status")).unwrap().modified().unwrap();
        orchestrator.satisfy(&[], &target).await.unwrap();
        let after = std::fs::metadata(base.join("slake.status")).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn satisfy_stops_at_the_first_failure() {
        let tmp = tempfile::tempdir().unwrap();
        seed_source(tmp.path());
        let manifest = r#"{
            "libraries": {
                "broken": {"directory": "vendor/lib", "project": {"commands": "exit 1"}},
                "fine": {
                    "directory": "vendor/lib",
                    "dependencies": "broken",
                    "project": {"commands": "true"}
                }
            }
        }"#;
        let orchestrator = orchestrator(tmp.path(), manifest);
        let target = Target::host();

        let error = orchestrator.satisfy(&[], &target).await.unwrap_err();
        match error {
            OrchestratorError::Build { library, .. } => assert_eq!(library, "broken"),
            other => panic!("unexpected error: {other}"),
        }
        let fine = orchestrator
            .build_directory("fine", &Selection::Target(target))
            .unwrap();
        assert!(!fine.exists());
    }

    #[test]
    fn path_queries_follow_build_order() {
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(tmp.path(), MANIFEST);
        let selection = Selection::Target(Target::host());

        let includes = orchestrator.include_paths(&[], &selection).unwrap();
        assert_eq!(includes.len(), 2);
        assert!(includes[0].ends_with("include"));
        assert!(includes[0].starts_with(tmp.path().join("needs/base")));
        assert!(includes[1].starts_with(tmp.path().join("needs/greeter")));

        let libs = orchestrator.library_paths(&[], &selection).unwrap();
        assert!(libs.iter().all(|p| p.ends_with("lib")));
    }

    #[test]
    fn unknown_universal_names_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(tmp.path(), MANIFEST);
        let error = orchestrator
            .build_directory("base", &Selection::Universal("ghost".into()))
            .unwrap_err();
        assert!(matches!(error, OrchestratorError::Unknown(_)));
    }

    #[tokio::test]
    async fn universal_satisfaction_builds_all_targets_then_merges() {
        let tmp = tempfile::tempdir().unwrap();
        seed_source(tmp.path());
        let manifest = r#"{
            "libraries": {
                "lib": {
                    "directory": "vendor/lib",
                    "project": {
                        "commands": [
                            "mkdir -p {build_directory}/include",
                            "printf 'arch {architecture}\n' > {build_directory}/include/lib.h"
                        ]
                    }
                }
            },
            "universal-binaries": {
                "fat": {"host": ["arm64", "x86_64"]}
            }
        }"#;
        let orchestrator = orchestrator(tmp.path(), manifest);
        orchestrator.satisfy_universal("fat", &[]).await.unwrap();

        let output = orchestrator
            .build_directory("lib", &Selection::Universal("fat".into()))
            .unwrap();
        let dispatcher = std::fs::read_to_string(output.join("include/lib.h")).unwrap();
        assert!(dispatcher.contains("slake_targets/host/arm64/include/lib.h"));
        assert!(dispatcher.contains("slake_targets/host/x86_64/include/lib.h"));
    }
}
