//! Configuration fingerprints and the on-disk build status format.

use serde::{Deserialize, Serialize};

/// A 32-byte SHA-256 digest of a build's effective configuration.
///
/// Equality of fingerprints is the sole cache-equivalence test in slake:
/// a build output is up to date iff the fingerprint persisted next to it
/// equals the one freshly computed from the current configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap a raw digest.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding, as stored in status files.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex encoding produced by [`to_hex`](Self::to_hex).
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, FingerprintError> {
        let bytes = hex::decode(s).map_err(|_| FingerprintError::Malformed(s.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FingerprintError::Malformed(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Fingerprint {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Errors produced when decoding a persisted fingerprint.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// The stored value is not a 64-character hex string.
    #[error("malformed fingerprint: {0:?}")]
    Malformed(String),
}

/// The status file written into every completed build directory.
///
/// Serialized as `{"configuration": "<hex fingerprint>"}`. The file is
/// written only after every build phase has succeeded, so its presence is
/// the marker that the directory is fully populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStatus {
    /// Hex fingerprint of the configuration the output was built from.
    pub configuration: String,
}

impl BuildStatus {
    /// Record the given fingerprint.
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self {
            configuration: fingerprint.to_hex(),
        }
    }

    /// Decode the recorded fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored hex string is malformed.
    pub fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Fingerprint::from_hex(&self.configuration)
    }
}
