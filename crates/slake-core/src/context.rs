//! Shared build context and scoped process execution.
//!
//! There is no process-wide singleton: everything that needs path
//! resolution, the HTTP client, or concurrency settings receives a
//! [`BuildContext`] reference, and adapters run external tools through an
//! [`ExecContext`] that carries the build's environment overrides instead
//! of mutating the process environment.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::adapters::{AdapterError, AdapterRegistry};

/// Options for constructing a [`BuildContext`].
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Rebuild everything regardless of cache state.
    pub force_build: bool,
    /// Requested job count; `<= 0` means one job per logical processor.
    pub concurrency: i32,
    /// Download cache override (normally from local state).
    pub cache_dir: Option<PathBuf>,
    /// Libraries in development mode (cache distrusted, source preserved).
    pub development_mode: HashSet<String>,
}

/// State threaded through every build: directory layout, cache location,
/// concurrency, and per-library flags.
#[derive(Debug)]
pub struct BuildContext {
    root: PathBuf,
    needs_dir: PathBuf,
    cache_dir: PathBuf,
    concurrency: usize,
    force_build: bool,
    development_mode: HashSet<String>,
    registry: AdapterRegistry,
    client: reqwest::Client,
}

impl BuildContext {
    /// Create a context rooted at the manifest's directory.
    pub fn new(root: impl Into<PathBuf>, options: ContextOptions) -> Self {
        let root = root.into();
        let needs_dir = root.join("needs");
        let cache_dir = options.cache_dir.unwrap_or_else(default_cache_dir);
        let concurrency = if options.concurrency <= 0 {
            num_cpus::get()
        } else {
            options.concurrency as usize
        };
        Self {
            root,
            needs_dir,
            cache_dir,
            concurrency,
            force_build: options.force_build,
            development_mode: options.development_mode,
            registry: AdapterRegistry::default(),
            client: reqwest::Client::new(),
        }
    }

    /// Directory containing the manifest.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory all per-library state lives under (`<root>/needs`).
    pub fn needs_dir(&self) -> &Path {
        &self.needs_dir
    }

    /// Per-library directory (`<root>/needs/<name>`).
    pub fn library_dir(&self, name: &str) -> PathBuf {
        self.needs_dir.join(name)
    }

    /// Checksum-keyed download cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Suggested job count for adapters that parallelize internally.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Whether the force-rebuild flag is set.
    pub fn force_build(&self) -> bool {
        self.force_build
    }

    /// Whether the named library is in development mode.
    pub fn development_mode(&self, library: &str) -> bool {
        self.development_mode.contains(library)
    }

    /// The registered build-tool adapters.
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Shared HTTP client for source downloads.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .map_or_else(|| PathBuf::from(".slake-cache"), |h| h.join(".slake"))
        .join("cache")
}

/// Execution scope for one build: working directory, environment overrides,
/// and the job-count suggestion. Created by the library build unit and
/// handed to every adapter phase.
#[derive(Debug, Clone)]
pub struct ExecContext {
    cwd: PathBuf,
    env: Vec<(String, String)>,
    jobs: usize,
}

impl ExecContext {
    /// Scope rooted at `cwd` with the given environment overrides.
    pub fn new(cwd: impl Into<PathBuf>, env: Vec<(String, String)>, jobs: usize) -> Self {
        Self {
            cwd: cwd.into(),
            env,
            jobs,
        }
    }

    /// The scope's working directory (the library source directory).
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Job-count suggestion for tools that take one.
    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Run a shell command line from the scope's working directory.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::CommandFailed`] on a nonzero exit.
    pub fn run_shell(&self, command_line: &str) -> Result<(), AdapterError> {
        tracing::debug!(command = command_line, "running");
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command_line).current_dir(&self.cwd);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        let status = cmd.status()?;
        if !status.success() {
            return Err(AdapterError::CommandFailed {
                command: command_line.to_string(),
                code: status.code(),
            });
        }
        Ok(())
    }

    /// Run a program with explicit arguments from the scope's working
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::CommandFailed`] on a nonzero exit.
    pub fn run(&self, program: &str, args: &[&str]) -> Result<(), AdapterError> {
        tracing::debug!(program, ?args, "running");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.cwd);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        let status = cmd.status()?;
        if !status.success() {
            return Err(AdapterError::CommandFailed {
                command: format!("{program} {}", args.join(" ")),
                code: status.code(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_zero_means_all_processors() {
        let ctx = BuildContext::new(
            "/tmp",
            ContextOptions {
                concurrency: 0,
                ..ContextOptions::default()
            },
        );
        assert_eq!(ctx.concurrency(), num_cpus::get());

        let ctx = BuildContext::new(
            "/tmp",
            ContextOptions {
                concurrency: 3,
                ..ContextOptions::default()
            },
        );
        assert_eq!(ctx.concurrency(), 3);
    }

    #[test]
    fn exec_applies_env_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = ExecContext::new(
            tmp.path(),
            vec![("SLAKE_TEST_VAR".into(), "2".into())],
            1,
        );
        exec.run_shell("test \"$SLAKE_TEST_VAR\" = 2").unwrap();
        let err = exec.run_shell("exit 3").unwrap_err();
        match err {
            AdapterError::CommandFailed { code, .. } => assert_eq!(code, Some(3)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
