use std::path::Path;

use anyhow::Result;
use slake_schema::Target;

/// Print one library's build output directory for a target or universal
/// build.
pub fn builddir(
    root: &Path,
    library: &str,
    target: Option<Target>,
    universal: Option<String>,
) -> Result<()> {
    let (_state, orchestrator) = super::open(root, false, 0)?;
    let selection = super::selection(target, universal);
    let directory = orchestrator.build_directory(library, &selection)?;
    println!("{}", directory.display());
    Ok(())
}
