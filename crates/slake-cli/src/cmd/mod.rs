//! Command implementations and the plumbing they share.

pub mod builddir;
pub mod dev;
pub mod flags;
pub mod satisfy;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use slake_core::context::ContextOptions;
use slake_core::orchestrator::Selection;
use slake_core::state::LocalState;
use slake_core::{BuildContext, Orchestrator};
use slake_schema::Target;

/// The directory commands operate in: `-C` when given, otherwise the
/// process working directory.
pub fn resolve_root(directory: Option<&Path>) -> Result<PathBuf> {
    match directory {
        Some(path) => Ok(path.to_path_buf()),
        None => std::env::current_dir().context("unable to determine the working directory"),
    }
}

/// Open the local state and an orchestrator over the manifest at `root`.
///
/// The state handle holds the tree's lock, so callers keep it alive for
/// the duration of the command.
pub fn open(root: &Path, force: bool, jobs: i32) -> Result<(LocalState, Orchestrator)> {
    tracing::debug!(root = %root.display(), "opening project");
    let state = LocalState::open(&root.join("needs"))
        .context("unable to open the local state")?;
    let options = ContextOptions {
        force_build: force,
        concurrency: jobs,
        cache_dir: state.cache_dir().map(Path::to_path_buf),
        development_mode: state.development_libraries().into_iter().collect(),
    };
    let ctx = BuildContext::new(root.to_path_buf(), options);
    let orchestrator = Orchestrator::open(ctx)
        .with_context(|| format!("unable to open the manifest under {}", root.display()))?;
    Ok((state, orchestrator))
}

/// Compile library name arguments into glob patterns.
pub fn patterns(libraries: &[String]) -> Result<Vec<glob::Pattern>> {
    libraries
        .iter()
        .map(|name| {
            glob::Pattern::new(name).with_context(|| format!("invalid library glob: {name}"))
        })
        .collect()
}

/// Turn the `--target`/`--universal` argument pair into a selection.
/// Neither flag means the host target.
pub fn selection(target: Option<Target>, universal: Option<String>) -> Selection {
    match universal {
        Some(name) => Selection::Universal(name),
        None => Selection::Target(target.unwrap_or_else(Target::host)),
    }
}

/// Reject names that are not libraries in the manifest.
pub fn check_known(orchestrator: &Orchestrator, names: &[String]) -> Result<()> {
    let manifest = orchestrator.manifest_for(None)?;
    for name in names {
        if !manifest.libraries.contains_key(name) {
            bail!("{name} is not in the manifest");
        }
    }
    Ok(())
}
