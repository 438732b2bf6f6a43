//! Durable local state, guarded by an advisory file lock.
//!
//! State that outlives a single invocation but never belongs in the
//! manifest: the download cache override and per-library development-mode
//! flags. The state file lives at `<needs-dir>/.slake/state.json` and is
//! held under an exclusive `flock` for the lifetime of the handle, so
//! concurrent invocations against the same tree serialize instead of
//! clobbering each other.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors raised while loading or saving local state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Filesystem or locking failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The state file exists but is not valid JSON.
    #[error("malformed state file: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    libraries: BTreeMap<String, LibraryState>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryState {
    #[serde(default)]
    development_mode: bool,
}

/// An exclusive handle on the tree's local state. Changes are in-memory
/// until [`save`](Self::save); the lock is released when the handle drops.
#[derive(Debug)]
pub struct LocalState {
    file: std::fs::File,
    data: StateData,
}

impl LocalState {
    /// Open (creating if necessary) and lock the state file under
    /// `needs_dir`. Blocks until any other holder releases the lock.
    ///
    /// # Errors
    ///
    /// Fails on filesystem errors or a state file that is not valid JSON.
    pub fn open(needs_dir: &Path) -> Result<Self, StateError> {
        let dir = needs_dir.join(".slake");
        std::fs::create_dir_all(&dir)?;
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join("state.json"))?;
        lock_exclusive(&file)?;

        let mut text = String::new();
        file.read_to_string(&mut text)?;
        let data = if text.trim().is_empty() {
            StateData::default()
        } else {
            serde_json::from_str(&text)?
        };
        Ok(Self { file, data })
    }

    /// The configured download cache override, if any.
    pub fn cache_dir(&self) -> Option<&Path> {
        self.data.cache.as_deref()
    }

    /// Set or clear the download cache override.
    pub fn set_cache_dir(&mut self, cache: Option<PathBuf>) {
        self.data.cache = cache;
    }

    /// Whether the named library is in development mode.
    pub fn development_mode(&self, library: &str) -> bool {
        self.data
            .libraries
            .get(library)
            .is_some_and(|s| s.development_mode)
    }

    /// Flip the named library's development-mode flag.
    pub fn set_development_mode(&mut self, library: &str, enabled: bool) {
        if enabled {
            self.data
                .libraries
                .entry(library.to_string())
                .or_default()
                .development_mode = true;
        } else if let Some(state) = self.data.libraries.get_mut(library) {
            state.development_mode = false;
        }
    }

    /// Names of every library currently in development mode.
    pub fn development_libraries(&self) -> Vec<String> {
        self.data
            .libraries
            .iter()
            .filter(|(_, s)| s.development_mode)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Persist the current state through the locked file handle.
    ///
    /// # Errors
    ///
    /// Fails on filesystem errors.
    pub fn save(&mut self) -> Result<(), StateError> {
        let text = serde_json::to_string_pretty(&self.data)?;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(text.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// Take the exclusive lock, first without blocking so contention can be
/// surfaced to the user, then blocking until it is free.
fn lock_exclusive(file: &std::fs::File) -> std::io::Result<()> {
    let fd = file.as_raw_fd();
    if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(());
    }
    let error = std::io::Error::last_os_error();
    if error.raw_os_error() != Some(libc::EWOULDBLOCK) {
        return Err(error);
    }
    tracing::info!("waiting for another invocation to release the state lock");
    if unsafe { libc::flock(fd, libc::LOCK_EX) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_flags_and_cache() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut state = LocalState::open(tmp.path()).unwrap();
            assert!(!state.development_mode("zlib"));
            state.set_development_mode("zlib", true);
            state.set_cache_dir(Some(PathBuf::from("/var/cache/slake")));
            state.save().unwrap();
        }
        let state = LocalState::open(tmp.path()).unwrap();
        assert!(state.development_mode("zlib"));
        assert!(!state.development_mode("openssl"));
        assert_eq!(state.cache_dir(), Some(Path::new("/var/cache/slake")));
        assert_eq!(state.development_libraries(), ["zlib"]);
    }

    #[test]
    fn disabling_clears_the_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = LocalState::open(tmp.path()).unwrap();
        state.set_development_mode("zlib", true);
        state.set_development_mode("zlib", false);
        state.save().unwrap();
        drop(state);

        let state = LocalState::open(tmp.path()).unwrap();
        assert!(!state.development_mode("zlib"));
        assert!(state.development_libraries().is_empty());
    }

    #[test]
    fn shrinking_state_truncates_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = LocalState::open(tmp.path()).unwrap();
        state.set_development_mode("a-library-with-a-long-name", true);
        state.save().unwrap();
        state.set_development_mode("a-library-with-a-long-name", false);
        state.save().unwrap();
        drop(state);

        let text =
            std::fs::read_to_string(tmp.path().join(".slake/state.json")).unwrap();
        serde_json::from_str::<serde_json::Value>(&text).unwrap();
    }
}
