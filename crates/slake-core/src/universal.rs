//! Universal build synthesis.
//!
//! A universal build merges one library's per-target build outputs into a
//! single tree that works for every contributing target. Static and shared
//! libraries are fused with `lipo`; headers become dispatchers that select
//! a per-target copy at preprocessing time; pkg-config files get their
//! prefix rewritten to be relocatable. The merged tree carries its own
//! status file so synthesis is cached exactly like a build.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde_json::json;
use sha2::{Digest, Sha256};
use slake_schema::{BuildStatus, Fingerprint};

use crate::config::{self, ConfigError};
use crate::context::BuildContext;
use crate::library::Library;

/// Extensions fused with `lipo`.
const BINARY_EXTENSIONS: &[&str] = &["a", "so", "dylib"];

/// Extensions replaced with preprocessor dispatchers.
const HEADER_EXTENSIONS: &[&str] = &["h", "hpp", "hxx", "ipp", "c", "cc", "cpp"];

/// Directory the per-target header copies are staged under, relative to
/// the merged tree's root.
const TARGETS_DIR: &str = "slake_targets";

/// Bumped whenever the synthesized output format changes incompatibly, so
/// existing merged trees are rebuilt.
const BUILD_COMPATIBILITY: u64 = 1;

/// Errors raised while synthesizing a universal build.
#[derive(Debug, thiserror::Error)]
pub enum UniversalError {
    /// Configuration evaluation failed for a contributor.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `lipo` exited nonzero.
    #[error("command failed with exit code {code:?}: {command}")]
    CommandFailed {
        /// The command line as executed.
        command: String,
        /// Exit code, if any.
        code: Option<i32>,
    },

    /// The universal build has no contributing targets.
    #[error("universal build {0} has no contributing targets")]
    NoContributors(String),
}

/// One library's universal build: the named merge of its per-target
/// outputs.
#[derive(Debug)]
pub struct UniversalBinary {
    name: String,
    contributors: Vec<Library>,
}

impl UniversalBinary {
    /// A universal build named `name` merging the given per-target units.
    /// All contributors must be the same manifest library.
    pub fn new(name: impl Into<String>, contributors: Vec<Library>) -> Self {
        Self {
            name: name.into(),
            contributors,
        }
    }

    /// The universal build's name, as declared in the manifest.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The per-target units being merged.
    pub fn contributors(&self) -> &[Library] {
        &self.contributors
    }

    /// The merged output directory
    /// (`needs/<library>/build/universal/<name>`).
    ///
    /// # Errors
    ///
    /// [`UniversalError::NoContributors`] when the target list is empty.
    pub fn output_directory(&self, ctx: &BuildContext) -> Result<PathBuf, UniversalError> {
        let first = self
            .contributors
            .first()
            .ok_or_else(|| UniversalError::NoContributors(self.name.clone()))?;
        Ok(first
            .directory(ctx)
            .join("build")
            .join("universal")
            .join(&self.name))
    }

    /// The fingerprint the merged tree records: a digest over every
    /// contributor's configuration fingerprint plus the output-format
    /// compatibility tag.
    pub fn fingerprint(&self) -> Result<Fingerprint, UniversalError> {
        let mut hasher = Sha256::new();
        for contributor in &self.contributors {
            hasher.update(contributor.fingerprint()?.as_bytes());
        }
        hasher.update(config::canonical_json(&json!({
            "build-compatibility": BUILD_COMPATIBILITY
        })));
        Ok(Fingerprint::new(hasher.finalize().into()))
    }

    /// Whether the existing merged tree can be trusted.
    ///
    /// Every contributor must itself be up to date: a stale contributor
    /// (forced, in development mode, or out of date) may produce different
    /// output under the same fingerprint, so the merge must rerun. On top
    /// of that the recorded fingerprint must match the current one.
    pub fn is_up_to_date(&self, ctx: &BuildContext) -> Result<bool, UniversalError> {
        for contributor in &self.contributors {
            if !contributor.is_up_to_date(ctx)? {
                return Ok(false);
            }
        }
        let status_path = self.output_directory(ctx)?.join("slake.status");
        let Ok(text) = std::fs::read_to_string(&status_path) else {
            return Ok(false);
        };
        let Ok(status) = serde_json::from_str::<BuildStatus>(&text) else {
            return Ok(false);
        };
        match status.fingerprint() {
            Ok(recorded) => Ok(recorded == self.fingerprint()?),
            Err(_) => Ok(false),
        }
    }

    /// Merge the contributor build directories into the output directory.
    ///
    /// Only paths present in every contributor are merged; anything else
    /// is logged and skipped. Any hard error deletes the whole output
    /// directory before propagating, so a partial merge is never trusted.
    ///
    /// # Errors
    ///
    /// Propagates filesystem and `lipo` failures.
    pub fn synthesize(&self, ctx: &BuildContext) -> Result<(), UniversalError> {
        let output = self.output_directory(ctx)?;
        if output.exists() {
            std::fs::remove_dir_all(&output)?;
        }
        std::fs::create_dir_all(&output)?;

        tracing::info!(universal = self.name, "synthesizing");

        if let Err(error) = self.merge_all(ctx, &output) {
            let _ = std::fs::remove_dir_all(&output);
            return Err(error);
        }

        let status = BuildStatus::new(self.fingerprint()?);
        let text = serde_json::to_string(&status).map_err(std::io::Error::other)?;
        std::fs::write(output.join("slake.status"), text)?;
        Ok(())
    }

    fn merge_all(&self, ctx: &BuildContext, output: &Path) -> Result<(), UniversalError> {
        let roots: Vec<PathBuf> = self
            .contributors
            .iter()
            .map(|c| c.build_directory(ctx))
            .collect();

        // Group every contributor entry by its path relative to the
        // contributor's build root. BTreeMap ordering puts directories
        // before their contents.
        let mut grouped: BTreeMap<PathBuf, Vec<(usize, PathBuf)>> = BTreeMap::new();
        for (index, root) in roots.iter().enumerate() {
            // A contributor with no build output (e.g. `build: false` for
            // its target) contributes nothing, which leaves no path
            // eligible rather than failing the merge.
            if !root.is_dir() {
                tracing::warn!(
                    target = %self.contributors[index].target(),
                    "contributor has no build output"
                );
                continue;
            }
            for entry in walkdir::WalkDir::new(root).min_depth(1) {
                let entry = entry.map_err(std::io::Error::other)?;
                if entry.file_name() == "slake.status" {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(root)
                    .map_err(std::io::Error::other)?
                    .to_path_buf();
                grouped
                    .entry(relative)
                    .or_default()
                    .push((index, entry.path().to_path_buf()));
            }
        }

        for (relative, entries) in &grouped {
            if entries.len() < self.contributors.len() {
                tracing::debug!(
                    path = %relative.display(),
                    "skipping: not present in every contributor"
                );
                continue;
            }
            self.merge_path(relative, entries, &roots, output)?;
        }
        Ok(())
    }

    fn merge_path(
        &self,
        relative: &Path,
        entries: &[(usize, PathBuf)],
        roots: &[PathBuf],
        output: &Path,
    ) -> Result<(), UniversalError> {
        let destination = output.join(relative);

        if entries.iter().all(|(_, path)| path.is_dir()) {
            std::fs::create_dir_all(&destination)?;
            return Ok(());
        }

        let first = &entries[0].1;
        if first.is_symlink() {
            let target = std::fs::read_link(first)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &destination)?;
            return Ok(());
        }

        if entries.len() == 1 {
            std::fs::copy(first, &destination)?;
            return Ok(());
        }

        let extension = relative
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        if BINARY_EXTENSIONS.contains(&extension) {
            return self.fuse_binaries(entries, &destination);
        }
        if HEADER_EXTENSIONS.contains(&extension) {
            return self.write_dispatcher(relative, entries, output);
        }
        if extension == "pc" && relative.parent().is_some_and(under_pkgconfig) {
            return merge_pkgconfig(relative, entries, roots, &destination);
        }

        tracing::debug!(path = %relative.display(), "skipping: no merge rule");
        Ok(())
    }

    /// Fuse per-target binaries into one fat binary with `lipo`. Each
    /// input is first reduced to its target's slice; inputs that are
    /// already thin are used as-is.
    fn fuse_binaries(
        &self,
        entries: &[(usize, PathBuf)],
        destination: &Path,
    ) -> Result<(), UniversalError> {
        let staging = tempfile::tempdir()?;
        let mut slices = Vec::with_capacity(entries.len());
        for (index, path) in entries {
            let architecture = &self.contributors[*index].target().architecture;
            let slice = staging.path().join(format!("{index}-{architecture}"));
            let extracted = run_lipo(&[
                &path.display().to_string(),
                "-extract",
                architecture,
                "-output",
                &slice.display().to_string(),
            ])
            .is_ok();
            if extracted {
                slices.push(slice);
            } else {
                slices.push(path.clone());
            }
        }

        let mut args: Vec<String> = vec!["-create".into()];
        args.extend(slices.iter().map(|s| s.display().to_string()));
        args.push("-output".into());
        args.push(destination.display().to_string());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_lipo(&args)
    }

    /// Replace a header with a dispatcher that includes a per-target copy
    /// under [`TARGETS_DIR`], guarded by each target's detection macro. A
    /// target with no detection macro aborts synthesis for this path.
    fn write_dispatcher(
        &self,
        relative: &Path,
        entries: &[(usize, PathBuf)],
        output: &Path,
    ) -> Result<(), UniversalError> {
        let mut blocks = Vec::with_capacity(entries.len());
        for (index, path) in entries {
            let target = self.contributors[*index].target();
            let Some(macro_) = target.platform.detection_macro(&target.architecture) else {
                tracing::warn!(
                    path = %relative.display(),
                    target = %target,
                    "skipping header: target is not detectable at preprocessing time"
                );
                return Ok(());
            };
            blocks.push((target.clone(), macro_, path.clone()));
        }

        // The dispatcher includes staged copies by a path relative to its
        // own location.
        let depth = relative
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .count()
            .saturating_sub(1);
        let ascent = "../".repeat(depth);

        let mut text = String::from("#if __APPLE__\n#include <TargetConditionals.h>\n#endif\n");
        for (target, macro_, path) in &blocks {
            let staged_relative = Path::new(TARGETS_DIR)
                .join(target.platform.identifier())
                .join(&target.architecture)
                .join(relative);
            let staged = output.join(&staged_relative);
            if let Some(parent) = staged.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(path, &staged)?;

            text.push_str(&format!(
                "#if {macro_}\n#include \"{ascent}{}\"\n#endif\n",
                staged_relative.display()
            ));
        }

        let destination = output.join(relative);
        std::fs::write(destination, text)?;
        Ok(())
    }
}

fn under_pkgconfig(parent: &Path) -> bool {
    parent
        .components()
        .any(|c| c.as_os_str() == "pkgconfig")
}

/// Merge pkg-config files by replacing every occurrence of the
/// contributor's absolute build directory with a relocatable placeholder
/// anchored at the file's own location. The rewrite covers `prefix=`,
/// `libdir=`, `Cflags:` and anything else referencing the build tree;
/// paths that are not the build directory are left alone. Contributors
/// whose files still diverge after the rewrite are skipped.
fn merge_pkgconfig(
    relative: &Path,
    entries: &[(usize, PathBuf)],
    roots: &[PathBuf],
    destination: &Path,
) -> Result<(), UniversalError> {
    let mut rewritten: Option<String> = None;
    for (index, path) in entries {
        let build_dir = roots[*index].display().to_string();
        let text = std::fs::read_to_string(path)?.replace(&build_dir, "${pcfiledir}/../..");
        match &rewritten {
            None => rewritten = Some(text),
            Some(existing) if *existing != text => {
                tracing::warn!(
                    path = %relative.display(),
                    "skipping pkg-config file: contributors diverge beyond the build directory"
                );
                return Ok(());
            }
            Some(_) => {}
        }
    }
    if let Some(text) = rewritten {
        std::fs::write(destination, text)?;
    }
    Ok(())
}

fn run_lipo(args: &[&str]) -> Result<(), UniversalError> {
    tracing::debug!(?args, "lipo");
    let status = std::process::Command::new("lipo").args(args).status()?;
    if !status.success() {
        return Err(UniversalError::CommandFailed {
            command: format!("lipo {}", args.join(" ")),
            code: status.code(),
        });
    }
    Ok(())
}
