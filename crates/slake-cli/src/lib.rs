//! slake - a native library build orchestrator
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! Builds the native libraries a project declares in its `needs.json`
//! manifest: sources are fetched and verified, builds are scheduled in
//! dependency order, outputs are cached by configuration fingerprint, and
//! per-target trees can be merged into universal builds.
//!
//! # Directory Layout
//!
//! ```text
//! <project>/
//! ├── needs.json                        # the manifest
//! └── needs/
//!     ├── .slake/state.json             # locked local state
//!     └── <library>/
//!         ├── source/                   # pristine source
//!         └── build/<platform>/<arch>/  # build output
//! ```

pub mod cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use slake_schema::Target;

/// Parse a `platform[:architecture]` target argument.
fn parse_target(s: &str) -> Result<Target, String> {
    Target::parse(s)
}

#[derive(Debug, Parser)]
#[command(name = "slake")]
#[command(author, version, about = "slake - a native library build orchestrator")]
pub struct Cli {
    /// Run as if invoked from this directory
    #[arg(short = 'C', long = "directory", global = true)]
    pub directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build libraries (and their dependencies) that are out of date
    Satisfy {
        /// Library name globs; everything in the manifest when omitted
        libraries: Vec<String>,
        /// Build target, e.g. host, iphoneos, android:arm64
        #[arg(short, long, value_parser = parse_target, conflicts_with = "universal")]
        target: Option<Target>,
        /// Satisfy a universal build declared in the manifest
        #[arg(short, long)]
        universal: Option<String>,
        /// Rebuild even when the cache says up to date
        #[arg(short, long)]
        force: bool,
        /// Concurrency hint passed to build tools; 0 means all processors
        #[arg(short = 'j', long, default_value_t = 0)]
        jobs: i32,
    },
    /// Print compiler include flags for the selected libraries
    Cflags {
        /// Library name globs; everything in the manifest when omitted
        libraries: Vec<String>,
        /// Build target the flags refer to
        #[arg(short, long, value_parser = parse_target, conflicts_with = "universal")]
        target: Option<Target>,
        /// Universal build the flags refer to
        #[arg(short, long)]
        universal: Option<String>,
    },
    /// Print linker search-path flags for the selected libraries
    Ldflags {
        /// Library name globs; everything in the manifest when omitted
        libraries: Vec<String>,
        /// Build target the flags refer to
        #[arg(short, long, value_parser = parse_target, conflicts_with = "universal")]
        target: Option<Target>,
        /// Universal build the flags refer to
        #[arg(short, long)]
        universal: Option<String>,
    },
    /// Print one library's build output directory
    Builddir {
        /// The library name
        library: String,
        /// Build target the directory refers to
        #[arg(short, long, value_parser = parse_target, conflicts_with = "universal")]
        target: Option<Target>,
        /// Universal build the directory refers to
        #[arg(short, long)]
        universal: Option<String>,
    },
    /// Manage per-library development mode
    Dev {
        #[command(subcommand)]
        command: DevCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum DevCommands {
    /// Put libraries into development mode: their source directories are
    /// preserved and their builds never trusted as cached
    Enable {
        /// Library names
        #[arg(required = true)]
        libraries: Vec<String>,
    },
    /// Take libraries out of development mode
    Disable {
        /// Library names
        #[arg(required = true)]
        libraries: Vec<String>,
    },
    /// Show which libraries are in development mode
    Status,
}
