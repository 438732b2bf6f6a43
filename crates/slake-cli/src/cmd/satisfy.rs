use std::path::Path;

use anyhow::Result;
use slake_schema::Target;

/// Build everything the filters select that is out of date.
pub async fn satisfy(
    root: &Path,
    libraries: &[String],
    target: Option<Target>,
    universal: Option<String>,
    force: bool,
    jobs: i32,
) -> Result<()> {
    let (_state, orchestrator) = super::open(root, force, jobs)?;
    let filters = super::patterns(libraries)?;

    match universal {
        Some(name) => orchestrator.satisfy_universal(&name, &filters).await?,
        None => {
            let target = target.unwrap_or_else(Target::host);
            orchestrator.satisfy(&filters, &target).await?;
        }
    }
    Ok(())
}
