//! The directory backend: a tree that already lives on disk.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::context::BuildContext;

use super::{Source, SourceError};

/// A source mirrored from a local directory.
///
/// Refresh wipes the destination and copies the origin's contents anew,
/// so edits under the origin always reach the next build.
#[derive(Debug)]
pub struct DirectorySource {
    origin: PathBuf,
    destination: PathBuf,
}

impl DirectorySource {
    /// Backend copying `origin` into `destination`.
    pub fn new(origin: PathBuf, destination: PathBuf) -> Self {
        Self {
            origin,
            destination,
        }
    }
}

#[async_trait]
impl Source for DirectorySource {
    async fn refresh(&self, _ctx: &BuildContext) -> Result<(), SourceError> {
        if !self.origin.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("source directory {} does not exist", self.origin.display()),
            )
            .into());
        }
        if self.destination.exists() {
            std::fs::remove_dir_all(&self.destination)?;
        }
        std::fs::create_dir_all(&self.destination)?;

        let mut options = fs_extra::dir::CopyOptions::new();
        options.content_only = true;
        fs_extra::dir::copy(&self.origin, &self.destination, &options)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BuildContext, ContextOptions};

    #[tokio::test]
    async fn refresh_mirrors_the_origin() {
        let origin = tempfile::tempdir().unwrap();
        std::fs::create_dir(origin.path().join("include")).unwrap();
        std::fs::write(origin.path().join("include/a.h"), "#pragma once\n").unwrap();

        let root = tempfile::tempdir().unwrap();
        let ctx = BuildContext::new(root.path().to_path_buf(), ContextOptions::default());
        let destination = root.path().join("needs/lib/source");

        let source = DirectorySource::new(origin.path().to_path_buf(), destination.clone());
        source.refresh(&ctx).await.unwrap();
        assert!(destination.join("include/a.h").is_file());

        // Stale content disappears on the next refresh.
        std::fs::write(destination.join("stale"), b"x").unwrap();
        source.refresh(&ctx).await.unwrap();
        assert!(!destination.join("stale").exists());
        assert!(destination.join("include/a.h").is_file());
    }

    #[tokio::test]
    async fn missing_origin_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let ctx = BuildContext::new(root.path().to_path_buf(), ContextOptions::default());
        let source = DirectorySource::new(
            root.path().join("nowhere"),
            root.path().join("needs/lib/source"),
        );
        assert!(source.refresh(&ctx).await.is_err());
    }
}
