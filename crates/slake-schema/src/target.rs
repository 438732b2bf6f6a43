//! Build targets: a (platform, architecture) pair.

use serde::{Deserialize, Serialize};

/// Deployment floor baked into the iOS toolchain marker. Bumping this forces
/// a rebuild of every iOS need, which is exactly what changing the minimum
/// version requires.
const MINIMUM_IOS_VERSION: &str = "12.0";

/// A platform a library can be built for.
///
/// `Host` is whatever machine slake is running on; the cross targets are a
/// closed set because universal-binary synthesis needs per-platform
/// preprocessor detection predicates, and those have to be curated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// The machine slake is running on.
    Host,
    /// iOS devices (`iphoneos` SDK).
    #[serde(rename = "iphoneos")]
    Ios,
    /// The iOS simulator (`iphonesimulator` SDK).
    #[serde(rename = "iphonesimulator")]
    IosSimulator,
    /// Android, cross-compiled with an NDK toolchain.
    Android,
}

impl Platform {
    /// Stable identifier used in target strings, manifests, and build paths.
    pub fn identifier(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Ios => "iphoneos",
            Self::IosSimulator => "iphonesimulator",
            Self::Android => "android",
        }
    }

    /// Whether this is the host platform.
    pub fn is_host(self) -> bool {
        self == Self::Host
    }

    /// Architecture used when a target string omits one.
    pub fn default_architecture(self) -> &'static str {
        match self {
            Self::Host => std::env::consts::ARCH,
            Self::Ios => "arm64",
            Self::IosSimulator => std::env::consts::ARCH,
            Self::Android => "arm64",
        }
    }

    /// Values a `platform` conditional case label is matched against.
    ///
    /// The host platform also answers to `host` and the raw OS identifier
    /// (e.g. `macos`, `linux`), so manifests can say either.
    pub fn condition_candidates(self) -> Vec<&'static str> {
        match self {
            Self::Host => vec!["host", std::env::consts::OS],
            other => vec![other.identifier()],
        }
    }

    /// Preprocessor predicate that is true exactly when code is being
    /// compiled for this platform and architecture.
    ///
    /// Used to guard per-target blocks in synthesized universal headers.
    /// `None` means the platform cannot be detected at preprocessing time
    /// for that architecture, which aborts header synthesis for the path.
    pub fn detection_macro(self, architecture: &str) -> Option<String> {
        match self {
            Self::Host => match std::env::consts::OS {
                "macos" => Some(format!(
                    "TARGET_OS_MAC && !TARGET_OS_IPHONE && {}",
                    pointer_width_predicate(architecture)
                )),
                "linux" => Some(format!(
                    "__linux__ && !__ANDROID__ && {}",
                    pointer_width_predicate(architecture)
                )),
                _ => None,
            },
            Self::Ios => match architecture {
                "arm64" => Some("TARGET_OS_IOS && !TARGET_OS_SIMULATOR && __LP64__".into()),
                "armv7" => Some("TARGET_OS_IOS && !TARGET_OS_SIMULATOR && !__LP64__".into()),
                _ => None,
            },
            Self::IosSimulator => match architecture {
                "arm64" | "x86_64" => {
                    Some("TARGET_OS_IOS && TARGET_OS_SIMULATOR && __LP64__".into())
                }
                "i386" => Some("TARGET_OS_IOS && TARGET_OS_SIMULATOR && !__LP64__".into()),
                _ => None,
            },
            Self::Android => match architecture {
                "arm64" => Some("__ANDROID__ && __aarch64__".into()),
                "armv7" => Some("__ANDROID__ && __arm__ && !__aarch64__".into()),
                "x86_64" => Some("__ANDROID__ && __x86_64__".into()),
                "x86" | "i386" => Some("__ANDROID__ && __i386__".into()),
                _ => None,
            },
        }
    }

    /// Toolchain marker chained into the configuration fingerprint.
    ///
    /// Builds on the host carry no marker; cross builds hash the parts of
    /// the toolchain selection that change the produced binaries.
    pub fn toolchain_fingerprint(self, architecture: &str) -> Option<Vec<u8>> {
        match self {
            Self::Host => None,
            Self::Ios | Self::IosSimulator => Some(
                format!(
                    "{}:{}:{}",
                    self.identifier(),
                    architecture,
                    MINIMUM_IOS_VERSION
                )
                .into_bytes(),
            ),
            Self::Android => {
                let ndk = std::env::var("ANDROID_NDK_HOME").unwrap_or_default();
                Some(format!("android:{architecture}:{ndk}").into_bytes())
            }
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Self::Host),
            "iphoneos" | "ios" => Ok(Self::Ios),
            "iphonesimulator" | "iossimulator" => Ok(Self::IosSimulator),
            "android" => Ok(Self::Android),
            _ => Err(format!("unknown platform: {s}")),
        }
    }
}

fn pointer_width_predicate(architecture: &str) -> &'static str {
    if architecture.contains("64") {
        "__LP64__"
    } else {
        "!__LP64__"
    }
}

/// A (platform, architecture) pair a library is built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// The platform half of the pair.
    pub platform: Platform,
    /// Architecture string, as the platform's toolchain spells it
    /// (`arm64`, `x86_64`, `armv7`, ...).
    pub architecture: String,
}

impl Target {
    /// Construct a target from its parts.
    pub fn new(platform: Platform, architecture: impl Into<String>) -> Self {
        Self {
            platform,
            architecture: architecture.into(),
        }
    }

    /// The host machine with its native architecture.
    pub fn host() -> Self {
        Self::new(Platform::Host, Platform::Host.default_architecture())
    }

    /// Parse a `platform[:architecture]` target string.
    ///
    /// A missing architecture falls back to the platform default, so
    /// `iphoneos` means `iphoneos:arm64`.
    ///
    /// # Errors
    ///
    /// Returns an error describing the unknown platform identifier.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (platform_part, architecture) = match s.split_once(':') {
            Some((p, a)) => (p, Some(a)),
            None => (s, None),
        };
        let platform: Platform = platform_part.parse()?;
        Ok(Self {
            architecture: architecture
                .unwrap_or_else(|| platform.default_architecture())
                .to_string(),
            platform,
        })
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.architecture)
    }
}
