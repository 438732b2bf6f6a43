//! The repository backend: a git clone pinned to a commit.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::context::BuildContext;

use super::{Source, SourceError};

/// A git repository checked out at a fixed commit.
///
/// Refresh is aggressive on purpose: `reset --hard` plus `clean -dffx`
/// discards every local edit and build byproduct, restoring the tree to
/// pristine. Development mode exists so people can opt out of that.
#[derive(Debug)]
pub struct GitSource {
    url: String,
    commit: Option<String>,
    destination: PathBuf,
}

impl GitSource {
    /// Backend for `url`, cloning into `destination`.
    pub fn new(url: String, commit: Option<String>, destination: PathBuf) -> Self {
        Self {
            url,
            commit,
            destination,
        }
    }

    async fn git(&self, cwd: Option<&Path>, args: &[&str]) -> Result<(), SourceError> {
        let mut cmd = tokio::process::Command::new("git");
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let status = cmd.status().await?;
        if !status.success() {
            return Err(SourceError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                code: status.code(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Source for GitSource {
    async fn refresh(&self, _ctx: &BuildContext) -> Result<(), SourceError> {
        let commit = self.commit.as_deref().ok_or(SourceError::MissingCommit)?;

        if !self.destination.join(".git").exists() {
            if let Some(parent) = self.destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(url = self.url, "cloning");
            self.git(
                None,
                &["clone", &self.url, &self.destination.display().to_string()],
            )
            .await?;
        } else {
            self.git(Some(&self.destination), &["fetch", "--tags", "origin"])
                .await?;
        }

        let dir = self.destination.as_path();
        self.git(Some(dir), &["checkout", commit]).await?;
        self.git(Some(dir), &["reset", "--hard"]).await?;
        self.git(Some(dir), &["clean", "-dffx"]).await?;
        Ok(())
    }
}
