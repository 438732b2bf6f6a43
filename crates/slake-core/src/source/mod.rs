//! Source acquisition backends.
//!
//! A [`Source`] knows how to put a library's pristine source tree in place.
//! `refresh` is destructive: whatever is in the source directory is
//! replaced by a clean checkout/unpack, which is exactly what a build wants
//! unless the library is in development mode (in which case the build unit
//! never calls it).

mod directory;
mod download;
mod git;

pub use directory::DirectorySource;
pub use download::DownloadSource;
pub use git::GitSource;

use std::path::Path;

use async_trait::async_trait;
use slake_schema::SourceSpec;

use crate::context::BuildContext;

/// Integrity failures around downloaded sources. All fatal; nothing here
/// is retried once raised.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    /// Downloads must declare a checksum; refusing to fetch without one.
    #[error("checksums are required for downloads")]
    MissingChecksum,

    /// The checksum's length matches neither MD5 (32) nor SHA-1 (40).
    #[error("unknown checksum type ({0} hex chars)")]
    UnknownChecksumType(usize),

    /// The checksum is not valid hex.
    #[error("malformed checksum: {0:?}")]
    MalformedChecksum(String),

    /// The fetched file hashed to something other than the declaration.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum declared in the manifest.
        expected: String,
        /// Checksum of the bytes actually received.
        actual: String,
    },

    /// Every fetch attempt failed.
    #[error("unable to download {url} after {attempts} attempts")]
    RetriesExhausted {
        /// The URL that kept failing.
        url: String,
        /// How many attempts were made.
        attempts: u32,
    },
}

/// Errors raised while refreshing a source tree.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Download integrity failure.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A repository source has no pinned commit.
    #[error("a commit is required for repository sources")]
    MissingCommit,

    /// An external command (git) exited nonzero.
    #[error("command failed with exit code {code:?}: {command}")]
    CommandFailed {
        /// The command line as executed.
        command: String,
        /// Exit code, if any.
        code: Option<i32>,
    },
}

/// A backend that can produce a pristine source tree.
#[async_trait]
pub trait Source: Send + Sync {
    /// Replace the source directory with pristine content.
    async fn refresh(&self, ctx: &BuildContext) -> Result<(), SourceError>;
}

/// Instantiate the backend for a manifest source spec. The source tree
/// lands in `<library_dir>/source`.
pub fn from_spec(spec: &SourceSpec, library_dir: &Path, root: &Path) -> Box<dyn Source> {
    let destination = library_dir.join("source");
    match spec {
        SourceSpec::Download { url, checksum } => Box::new(DownloadSource::new(
            url.clone(),
            checksum.clone(),
            destination,
        )),
        SourceSpec::Repository { url, commit } => {
            Box::new(GitSource::new(url.clone(), commit.clone(), destination))
        }
        SourceSpec::Directory(path) => {
            let origin = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            Box::new(DirectorySource::new(origin, destination))
        }
    }
}
