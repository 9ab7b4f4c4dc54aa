//! One-time download and extraction of the embedding model archive.
//!
//! [`ensure_artifact`] moves the local state forward through
//! "not present" → "present as archive" → "present as extracted directory"
//! and never backwards. Once the target directory exists it performs no
//! network or filesystem action at all.
//!
//! Downloads land in `<archive>.part` and extraction in `<target>.partial`;
//! both are renamed only on success, so an interrupted run never leaves a
//! directory that looks extracted.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::config::ArtifactConfig;
use crate::traits::ArtifactSource;

/// What [`ensure_artifact`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Target directory already existed; nothing was touched.
    AlreadyPresent,
    /// Archive was extracted (and downloaded first when `downloaded`).
    Extracted { downloaded: bool, entries: usize },
}

/// Downloads archives over HTTP(S). No timeout and no retry.
pub struct HttpArtifactSource {
    client: reqwest::Client,
}

impl HttpArtifactSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cancerpedia/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?
            .error_for_status()
            .with_context(|| format!("Download of {} failed", url))?;

        // File hosts answer with an HTML interstitial when they refuse to
        // serve the file directly.
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/html"))
            .unwrap_or(false);
        if is_html {
            bail!("{} returned an HTML page instead of an archive", url);
        }

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let data = chunk.with_context(|| format!("Download of {} interrupted", url))?;
            file.write_all(&data).await?;
            written += data.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = total {
            if expected != written {
                bail!(
                    "Download of {} truncated: expected {} bytes, got {}",
                    url,
                    expected,
                    written
                );
            }
        }

        Ok(written)
    }
}

/// Make sure `config.target_dir` exists, downloading and unpacking the
/// archive if it does not.
pub async fn ensure_artifact(
    config: &ArtifactConfig,
    source: &dyn ArtifactSource,
) -> Result<FetchOutcome> {
    let target = &config.target_dir;
    let archive = &config.archive;

    if target.exists() {
        tracing::info!(dir = %target.display(), "model already extracted");
        return Ok(FetchOutcome::AlreadyPresent);
    }

    let mut downloaded = false;
    if archive.exists() {
        tracing::info!(archive = %archive.display(), "archive already present");
    } else {
        tracing::info!(
            url = %config.url,
            archive = %archive.display(),
            "downloading model archive"
        );
        if let Some(parent) = archive.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let part = with_suffix(archive, ".part");
        remove_file_if_exists(&part)?;

        match source.download(&config.url, &part).await {
            Ok(bytes) => {
                fs::rename(&part, archive).with_context(|| {
                    format!("Failed to move {} into place", part.display())
                })?;
                tracing::info!(bytes, "download complete");
                downloaded = true;
            }
            Err(e) => {
                let _ = fs::remove_file(&part);
                return Err(e.context("Failed to download model archive"));
            }
        }
    }

    if let Some(expected) = &config.sha256 {
        let actual = sha256_file(archive).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            let _ = fs::remove_file(archive);
            bail!(
                "Checksum mismatch for {}: expected {}, got {}",
                archive.display(),
                expected,
                actual
            );
        }
    }

    tracing::info!(dir = %target.display(), "extracting model");
    let staging = with_suffix(target, ".partial");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    let archive_path = archive.clone();
    let staging_path = staging.clone();
    let extracted =
        tokio::task::spawn_blocking(move || extract_zip(&archive_path, &staging_path)).await?;

    let entries = match extracted {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.context(format!("Failed to extract {}", archive.display())));
        }
    };

    fs::rename(&staging, target)
        .with_context(|| format!("Failed to move extracted files to {}", target.display()))?;
    fs::remove_file(archive)
        .with_context(|| format!("Failed to remove {}", archive.display()))?;

    tracing::info!(dir = %target.display(), entries, "extracted model and removed archive");
    Ok(FetchOutcome::Extracted {
        downloaded,
        entries,
    })
}

/// Unpack every entry of a zip file below `destination`.
///
/// Returns the number of files written. Entries that would escape the
/// destination are rejected.
pub fn extract_zip(archive_path: &Path, destination: &Path) -> Result<usize> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut zip = zip::ZipArchive::new(file)?;
    fs::create_dir_all(destination)?;

    let mut files = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            bail!("Unsafe archive entry: {}", entry.name());
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let out_path = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut outfile)?;
            files += 1;
        }
    }
    Ok(files)
}

async fn sha256_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut file = fs::File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await?
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
