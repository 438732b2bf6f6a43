//! The download backend: checksum-addressed archive cache with verified,
//! retried fetches and content-sniffing extraction.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use md5::Md5;
use sha1::Sha1;
use sha2::Digest;

use crate::context::BuildContext;

use super::{IntegrityError, Source, SourceError};

const MAX_ATTEMPTS: u32 = 5;

/// A source archive fetched over HTTP.
///
/// The cache is keyed by checksum, so a hit requires no network access at
/// all and different URLs serving identical bytes share one entry.
#[derive(Debug)]
pub struct DownloadSource {
    url: String,
    checksum: Option<String>,
    destination: PathBuf,
}

impl DownloadSource {
    /// Backend for `url`, unpacking into `destination`.
    pub fn new(url: String, checksum: Option<String>, destination: PathBuf) -> Self {
        Self {
            url,
            checksum,
            destination,
        }
    }
}

#[async_trait]
impl Source for DownloadSource {
    async fn refresh(&self, ctx: &BuildContext) -> Result<(), SourceError> {
        let checksum = self
            .checksum
            .as_deref()
            .ok_or(IntegrityError::MissingChecksum)?
            .to_ascii_lowercase();
        let kind = ChecksumKind::infer(&checksum)?;

        std::fs::create_dir_all(ctx.cache_dir())?;
        let cached = ctx.cache_dir().join(&checksum);
        if !cached.is_file() {
            fetch(ctx, &self.url, &checksum, kind, &cached).await?;
        } else {
            tracing::debug!(checksum, "download cache hit");
        }

        tracing::info!(destination = %self.destination.display(), "unpacking");
        if self.destination.exists() {
            std::fs::remove_dir_all(&self.destination)?;
        }
        std::fs::create_dir_all(&self.destination)?;
        unpack(&cached, &self.destination)?;
        hoist_lone_directories(&self.destination)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum ChecksumKind {
    Md5,
    Sha1,
}

impl ChecksumKind {
    fn infer(checksum: &str) -> Result<Self, IntegrityError> {
        if !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IntegrityError::MalformedChecksum(checksum.to_string()));
        }
        match checksum.len() {
            32 => Ok(Self::Md5),
            40 => Ok(Self::Sha1),
            other => Err(IntegrityError::UnknownChecksumType(other)),
        }
    }

    fn hasher(self) -> ChecksumHasher {
        match self {
            Self::Md5 => ChecksumHasher::Md5(Md5::new()),
            Self::Sha1 => ChecksumHasher::Sha1(Sha1::new()),
        }
    }
}

enum ChecksumHasher {
    Md5(Md5),
    Sha1(Sha1),
}

impl ChecksumHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
        }
    }
}

/// Fetch `url` into the cache at `cached`, verifying against `checksum`
/// before the file becomes visible there.
async fn fetch(
    ctx: &BuildContext,
    url: &str,
    checksum: &str,
    kind: ChecksumKind,
    cached: &Path,
) -> Result<(), SourceError> {
    tracing::info!(url, "downloading");
    for attempt in 1..=MAX_ATTEMPTS {
        match try_fetch(ctx, url, checksum, kind, cached).await {
            Ok(()) => return Ok(()),
            // Verification failures are never retried: the server gave us a
            // complete response, it just wasn't the declared content.
            Err(FetchFailure::Fatal(e)) => return Err(e),
            Err(FetchFailure::Transient(reason)) => {
                tracing::warn!(url, attempt, reason, "download failed, retrying");
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(retry_delay(attempt)).await;
                }
            }
        }
    }
    Err(IntegrityError::RetriesExhausted {
        url: url.to_string(),
        attempts: MAX_ATTEMPTS,
    }
    .into())
}

fn retry_delay(attempt: u32) -> Duration {
    // Linear backoff: attempt-count seconds. Tests shrink the unit so the
    // exhaustion path stays fast.
    if cfg!(test) {
        Duration::from_millis(u64::from(attempt))
    } else {
        Duration::from_secs(u64::from(attempt))
    }
}

enum FetchFailure {
    Transient(String),
    Fatal(SourceError),
}

async fn try_fetch(
    ctx: &BuildContext,
    url: &str,
    checksum: &str,
    kind: ChecksumKind,
    cached: &Path,
) -> Result<(), FetchFailure> {
    let response = ctx
        .client()
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await
        .map_err(|e| FetchFailure::Transient(e.to_string()))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(FetchFailure::Transient(format!(
            "status {}",
            response.status()
        )));
    }
    if response.content_length().is_none() {
        return Err(FetchFailure::Transient("missing content-length".into()));
    }

    // Temp file in the cache directory so the final persist is a rename on
    // the same filesystem; dropped (and deleted) on any failure below.
    let mut temp = tempfile::NamedTempFile::new_in(
        cached.parent().unwrap_or_else(|| Path::new(".")),
    )
    .map_err(|e| FetchFailure::Fatal(e.into()))?;

    let mut hasher = kind.hasher();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchFailure::Transient(e.to_string()))?;
        hasher.update(&chunk);
        temp.write_all(&chunk)
            .map_err(|e| FetchFailure::Fatal(e.into()))?;
    }
    temp.flush().map_err(|e| FetchFailure::Fatal(e.into()))?;

    let actual = hasher.finalize_hex();
    if actual != checksum {
        return Err(FetchFailure::Fatal(
            IntegrityError::ChecksumMismatch {
                expected: checksum.to_string(),
                actual,
            }
            .into(),
        ));
    }

    temp.persist(cached)
        .map_err(|e| FetchFailure::Fatal(e.error.into()))?;
    Ok(())
}

/// Unpack `archive` into `destination`, sniffing the format by content.
fn unpack(archive: &Path, destination: &Path) -> Result<(), SourceError> {
    let mut file = std::fs::File::open(archive)?;
    let mut head = [0u8; 512];
    let read = file.read(&mut head)?;
    let head = &head[..read];

    if head.starts_with(&[0x1f, 0x8b]) {
        let file = std::fs::File::open(archive)?;
        let decoder = flate2::read::GzDecoder::new(file);
        tar::Archive::new(decoder).unpack(destination)?;
        return Ok(());
    }
    if head.starts_with(b"PK") {
        let file = std::fs::File::open(archive)?;
        let mut zip = zip::ZipArchive::new(file).map_err(std::io::Error::other)?;
        zip.extract(destination).map_err(std::io::Error::other)?;
        return Ok(());
    }
    if is_tar(archive)? {
        let file = std::fs::File::open(archive)?;
        tar::Archive::new(file).unpack(destination)?;
        return Ok(());
    }

    tracing::warn!(archive = %archive.display(), "unrecognized archive format, nothing unpacked");
    Ok(())
}

fn is_tar(archive: &Path) -> std::io::Result<bool> {
    use std::io::{Seek, SeekFrom};
    let mut file = std::fs::File::open(archive)?;
    if file.metadata()?.len() < 262 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(257))?;
    let mut magic = [0u8; 5];
    file.read_exact(&mut magic)?;
    Ok(&magic == b"ustar")
}

/// While the tree's top level is a single directory, hoist its contents up
/// to replace the tree. Archives almost always wrap everything in a
/// `name-version/` directory the build doesn't want.
fn hoist_lone_directories(destination: &Path) -> std::io::Result<()> {
    loop {
        let entries: Vec<_> =
            std::fs::read_dir(destination)?.collect::<std::io::Result<Vec<_>>>()?;
        let [lone] = entries.as_slice() else {
            return Ok(());
        };
        let file_type = lone.file_type()?;
        if !file_type.is_dir() || file_type.is_symlink() {
            return Ok(());
        }

        let staging = destination.with_extension("hoist");
        std::fs::rename(lone.path(), &staging)?;
        std::fs::remove_dir_all(destination)?;
        std::fs::rename(&staging, destination)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BuildContext, ContextOptions};

    fn context(cache_dir: &Path) -> BuildContext {
        BuildContext::new(
            "/tmp",
            ContextOptions {
                cache_dir: Some(cache_dir.to_path_buf()),
                concurrency: 1,
                ..ContextOptions::default()
            },
        )
    }

    /// Gzipped tar with a single `pkg-1.0/` top-level directory.
    fn sample_archive() -> Vec<u8> {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let mut header = tar::Header::new_gnu();
        let body = b"int answer(void);\n";
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "pkg-1.0/include/answer.h", &body[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn md5_hex(data: &[u8]) -> String {
        hex::encode(Md5::digest(data))
    }

    #[tokio::test]
    async fn refresh_fetches_verifies_and_hoists() {
        let mut server = mockito::Server::new_async().await;
        let archive = sample_archive();
        let checksum = md5_hex(&archive);
        let mock = server
            .mock("GET", "/pkg.tar.gz")
            .with_status(200)
            .with_body(archive)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("cache");
        let destination = tmp.path().join("source");
        let source = DownloadSource::new(
            format!("{}/pkg.tar.gz", server.url()),
            Some(checksum.clone()),
            destination.clone(),
        );

        source.refresh(&context(&cache)).await.unwrap();
        mock.assert_async().await;

        // Lone pkg-1.0/ directory hoisted away.
        assert!(destination.join("include/answer.h").is_file());
        assert!(cache.join(&checksum).is_file());
    }

    #[tokio::test]
    async fn cache_hit_skips_network_entirely() {
        let mut server = mockito::Server::new_async().await;
        let archive = sample_archive();
        let checksum = md5_hex(&archive);
        let mock = server
            .mock("GET", "/pkg.tar.gz")
            .expect(0)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join(&checksum), &archive).unwrap();

        let destination = tmp.path().join("source");
        let source = DownloadSource::new(
            format!("{}/pkg.tar.gz", server.url()),
            Some(checksum),
            destination.clone(),
        );
        source.refresh(&context(&cache)).await.unwrap();
        mock.assert_async().await;
        assert!(destination.join("include/answer.h").is_file());
    }

    #[tokio::test]
    async fn checksum_mismatch_is_fatal_and_caches_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/pkg.tar.gz")
            .with_status(200)
            .with_body(b"not the declared bytes".to_vec())
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("cache");
        let expected = "d".repeat(32);
        let source = DownloadSource::new(
            format!("{}/pkg.tar.gz", server.url()),
            Some(expected.clone()),
            tmp.path().join("source"),
        );

        let err = source.refresh(&context(&cache)).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Integrity(IntegrityError::ChecksumMismatch { .. })
        ));
        assert!(!cache.join(&expected).exists());
        // Only the (empty) cache dir itself was created; no partial files.
        let leftovers: Vec<_> = std::fs::read_dir(&cache).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn missing_checksum_is_an_integrity_error() {
        let tmp = tempfile::tempdir().unwrap();
        let source =
            DownloadSource::new("http://localhost/x".into(), None, tmp.path().join("s"));
        let err = source.refresh(&context(tmp.path())).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Integrity(IntegrityError::MissingChecksum)
        ));

        let source = DownloadSource::new(
            "http://localhost/x".into(),
            Some("abc123".into()),
            tmp.path().join("s"),
        );
        let err = source.refresh(&context(tmp.path())).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Integrity(IntegrityError::UnknownChecksumType(6))
        ));
    }

    #[tokio::test]
    async fn persistent_failures_exhaust_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pkg.tar.gz")
            .with_status(503)
            .expect(5)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let source = DownloadSource::new(
            format!("{}/pkg.tar.gz", server.url()),
            Some("a".repeat(40)),
            tmp.path().join("source"),
        );
        let err = source.refresh(&context(tmp.path())).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Integrity(IntegrityError::RetriesExhausted { attempts: 5, .. })
        ));
        mock.assert_async().await;
    }

    #[test]
    fn hoisting_stops_at_multi_entry_levels() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("tree");
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("a/b/file"), "x").unwrap();
        std::fs::write(root.join("a/other"), "y").unwrap();

        hoist_lone_directories(&root).unwrap();
        // "a" was lone -> hoisted; "b" + "other" is not lone -> kept.
        assert!(root.join("b/file").is_file());
        assert!(root.join("other").is_file());
    }
}
