use std::path::Path;

use anyhow::Result;
use slake_schema::Target;

/// Print `-I` flags for the selected libraries, space-separated, ready
/// for a compiler invocation.
pub fn cflags(
    root: &Path,
    libraries: &[String],
    target: Option<Target>,
    universal: Option<String>,
) -> Result<()> {
    print_flags(root, libraries, target, universal, "-I", |o, f, s| {
        o.include_paths(f, s).map_err(Into::into)
    })
}

/// Print `-L` flags for the selected libraries.
pub fn ldflags(
    root: &Path,
    libraries: &[String],
    target: Option<Target>,
    universal: Option<String>,
) -> Result<()> {
    print_flags(root, libraries, target, universal, "-L", |o, f, s| {
        o.library_paths(f, s).map_err(Into::into)
    })
}

fn print_flags(
    root: &Path,
    libraries: &[String],
    target: Option<Target>,
    universal: Option<String>,
    prefix: &str,
    paths: impl Fn(
        &slake_core::Orchestrator,
        &[glob::Pattern],
        &slake_core::orchestrator::Selection,
    ) -> Result<Vec<std::path::PathBuf>>,
) -> Result<()> {
    let (_state, orchestrator) = super::open(root, false, 0)?;
    let filters = super::patterns(libraries)?;
    let selection = super::selection(target, universal);

    let flags: Vec<String> = paths(&orchestrator, &filters, &selection)?
        .iter()
        .map(|path| format!("{prefix}{}", path.display()))
        .collect();
    println!("{}", flags.join(" "));
    Ok(())
}
