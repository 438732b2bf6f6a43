//! The needs manifest: which libraries a project needs, where their sources
//! come from, and which universal binaries to synthesize.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::target::Target;

/// A parsed `needs.json` manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Library name -> need declaration.
    #[serde(default)]
    pub libraries: BTreeMap<String, ManifestEntry>,
    /// Universal binary name -> contributing (platform, architectures).
    #[serde(default, rename = "universal-binaries")]
    pub universal_binaries: BTreeMap<String, UniversalBinarySpec>,
}

/// Which targets contribute to a universal binary: platform identifier ->
/// architecture list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniversalBinarySpec(pub BTreeMap<String, Vec<String>>);

impl UniversalBinarySpec {
    /// Expand the spec into concrete targets.
    ///
    /// # Errors
    ///
    /// Returns an error naming any unknown platform identifier.
    pub fn targets(&self) -> Result<Vec<Target>, String> {
        let mut targets = Vec::new();
        for (platform, architectures) in &self.0 {
            let platform = platform.parse()?;
            for architecture in architectures {
                targets.push(Target::new(platform, architecture.clone()));
            }
        }
        Ok(targets)
    }
}

/// One library's declaration in the manifest.
///
/// Exactly one of the source fields (`download`, `repository`, `directory`)
/// is expected; [`source_spec`](Self::source_spec) enforces that. Unknown
/// top-level keys are preserved in `extra` so they participate in the
/// configuration fingerprint rather than being silently dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// URL of a source archive to download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,
    /// Hex MD5 or SHA-1 checksum of the downloaded archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// URL of a git repository to clone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Commit (or tag) to check out of `repository`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Path of a local source tree, relative to the manifest root unless
    /// absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Names of other libraries in the manifest that must be built first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Dependencies>,
    /// Conditional per-target project configuration, evaluated by the
    /// configuration evaluator before every build.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub project: Map<String, Value>,
    /// Unrecognized top-level keys, kept so they still affect the
    /// fingerprint.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ManifestEntry {
    /// The source specification for this entry, if any was declared.
    pub fn source_spec(&self) -> Option<SourceSpec> {
        if let Some(url) = &self.download {
            return Some(SourceSpec::Download {
                url: url.clone(),
                checksum: self.checksum.clone(),
            });
        }
        if let Some(url) = &self.repository {
            return Some(SourceSpec::Repository {
                url: url.clone(),
                commit: self.commit.clone(),
            });
        }
        self.directory.clone().map(SourceSpec::Directory)
    }

    /// Declared direct dependencies, normalized to a list.
    pub fn dependency_names(&self) -> Vec<String> {
        match &self.dependencies {
            None => Vec::new(),
            Some(Dependencies::One(name)) => vec![name.clone()],
            Some(Dependencies::Many(names)) => names.clone(),
        }
    }

    /// The entry as a JSON object, exactly as it would appear in the
    /// manifest. This is what the fingerprint hashes (minus `project`).
    pub fn as_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A dependency list that may be written as a single string or an array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dependencies {
    /// `"dependencies": "zlib"`
    One(String),
    /// `"dependencies": ["zlib", "openssl"]`
    Many(Vec<String>),
}

/// Where a library's pristine source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// An archive fetched over HTTP and verified against `checksum`.
    Download {
        /// Archive URL.
        url: String,
        /// Hex MD5 or SHA-1 checksum; required by the download backend.
        checksum: Option<String>,
    },
    /// A git repository pinned to `commit`.
    Repository {
        /// Clone URL.
        url: String,
        /// Commit or tag to check out; required by the git backend.
        commit: Option<String>,
    },
    /// A local directory, copied verbatim.
    Directory(PathBuf),
}

impl Manifest {
    /// Parse manifest text, running target substitution over the raw text
    /// first when a target is known.
    ///
    /// Substitution replaces `{platform}`, `{architecture}`, and
    /// `{host-platform}` tokens anywhere in the text, which lets download
    /// URLs and project configuration vary per target without conditionals.
    ///
    /// # Errors
    ///
    /// Returns a JSON parse error for malformed manifests.
    pub fn parse(text: &str, target: Option<&Target>) -> Result<Self, serde_json::Error> {
        let rendered = match target {
            Some(target) => render(text, target),
            None => text.to_string(),
        };
        serde_json::from_str(&rendered)
    }

    /// Load and parse a manifest file. See [`parse`](Self::parse).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path, target: Option<&Target>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, target).map_err(std::io::Error::other)
    }
}

fn render(text: &str, target: &Target) -> String {
    text.replace("{platform}", target.platform.identifier())
        .replace("{architecture}", &target.architecture)
        .replace("{host-platform}", std::env::consts::OS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Platform;

    const SAMPLE: &str = r#"{
        "libraries": {
            "zlib": {
                "download": "https://example.com/zlib-{platform}.tar.gz",
                "checksum": "0123456789abcdef0123456789abcdef",
                "project": {"type": "make"}
            },
            "cares": {
                "repository": "https://example.com/c-ares.git",
                "commit": "deadbeef",
                "dependencies": "zlib"
            }
        },
        "universal-binaries": {
            "apple": {
                "iphoneos": ["arm64"],
                "iphonesimulator": ["arm64", "x86_64"]
            }
        }
    }"#;

    #[test]
    fn parses_and_substitutes() {
        let target = Target::new(Platform::Ios, "arm64");
        let manifest = Manifest::parse(SAMPLE, Some(&target)).unwrap();
        let zlib = &manifest.libraries["zlib"];
        assert_eq!(
            zlib.download.as_deref(),
            Some("https://example.com/zlib-iphoneos.tar.gz")
        );
        assert_eq!(manifest.libraries["cares"].dependency_names(), ["zlib"]);
    }

    #[test]
    fn universal_binary_expands_targets() {
        let manifest = Manifest::parse(SAMPLE, None).unwrap();
        let targets = manifest.universal_binaries["apple"].targets().unwrap();
        assert_eq!(targets.len(), 3);
        assert!(targets.contains(&Target::new(Platform::IosSimulator, "x86_64")));
    }

    #[test]
    fn source_spec_prefers_declared_kind() {
        let manifest = Manifest::parse(SAMPLE, None).unwrap();
        match manifest.libraries["cares"].source_spec() {
            Some(SourceSpec::Repository { commit, .. }) => {
                assert_eq!(commit.as_deref(), Some("deadbeef"));
            }
            other => panic!("unexpected source spec: {other:?}"),
        }
        assert_eq!(ManifestEntry::default().source_spec(), None);
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let entry: ManifestEntry =
            serde_json::from_str(r#"{"directory": "vendor/x", "pin": 3}"#).unwrap();
        let value = entry.as_value();
        assert_eq!(value["pin"], 3);
    }
}
