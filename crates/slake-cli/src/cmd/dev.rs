use std::path::Path;

use anyhow::Result;

/// Flip development mode for the named libraries and persist the change.
pub fn set(root: &Path, libraries: &[String], enabled: bool) -> Result<()> {
    let (mut state, orchestrator) = super::open(root, false, 0)?;
    super::check_known(&orchestrator, libraries)?;
    for library in libraries {
        state.set_development_mode(library, enabled);
        let mode = if enabled { "enabled" } else { "disabled" };
        println!("development mode {mode} for {library}");
    }
    state.save()?;
    Ok(())
}

/// List the libraries currently in development mode.
pub fn status(root: &Path) -> Result<()> {
    let (state, _orchestrator) = super::open(root, false, 0)?;
    let libraries = state.development_libraries();
    if libraries.is_empty() {
        println!("no libraries are in development mode");
        return Ok(());
    }
    for library in libraries {
        println!("{library}");
    }
    Ok(())
}
