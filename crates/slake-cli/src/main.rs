//! slake command-line entry point

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use slake_cli::cmd;
use slake_cli::{Cli, Commands, DevCommands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cmd::resolve_root(cli.directory.as_deref())?;

    match cli.command {
        Commands::Satisfy {
            libraries,
            target,
            universal,
            force,
            jobs,
        } => cmd::satisfy::satisfy(&root, &libraries, target, universal, force, jobs).await,
        Commands::Cflags {
            libraries,
            target,
            universal,
        } => cmd::flags::cflags(&root, &libraries, target, universal),
        Commands::Ldflags {
            libraries,
            target,
            universal,
        } => cmd::flags::ldflags(&root, &libraries, target, universal),
        Commands::Builddir {
            library,
            target,
            universal,
        } => cmd::builddir::builddir(&root, &library, target, universal),
        Commands::Dev { command } => match command {
            DevCommands::Enable { libraries } => cmd::dev::set(&root, &libraries, true),
            DevCommands::Disable { libraries } => cmd::dev::set(&root, &libraries, false),
            DevCommands::Status => cmd::dev::status(&root),
        },
    }
}
