use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use futures_util::StreamExt;
use pflash_util::Config;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, warn};

use crate::cancel::{cancel_requested, CancelRx};
use crate::error::{AttemptFailure, FetchError, NetworkError};
use crate::extract::extract_zip;
use crate::hashing::{digest_matches, sha256_file};
use crate::progress::ProgressBuckets;

pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    #[default]
    None,
    Zip,
}

/// What to download and what to do with it afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSpec {
    /// Tried in order; the first one producing a non-empty file wins.
    pub urls: Vec<String>,
    pub destination: PathBuf,
    #[serde(default)]
    pub archive: ArchiveKind,
    /// Extraction target for archives. Defaults to the destination's directory.
    #[serde(default)]
    pub extract_to: Option<PathBuf>,
    #[serde(default)]
    pub sha256: Option<String>,
    /// Page to send the user to when every URL fails.
    #[serde(default)]
    pub fallback_url: Option<String>,
}

impl DownloadSpec {
    pub fn new(urls: Vec<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            urls,
            destination: destination.into(),
            archive: ArchiveKind::None,
            extract_to: None,
            sha256: None,
            fallback_url: None,
        }
    }

    pub fn zip(mut self, extract_to: impl Into<PathBuf>) -> Self {
        self.archive = ArchiveKind::Zip;
        self.extract_to = Some(extract_to.into());
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn with_fallback(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }

    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.destination.display().to_string())
    }

    fn extraction_dir(&self) -> PathBuf {
        self.extract_to.clone().unwrap_or_else(|| {
            self.destination
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
        })
    }
}

/// Progress notifications emitted while fetching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchEvent {
    AttemptStarted { url: String, total: Option<u64> },
    Progress { percent: u8, downloaded: u64, total: u64 },
    AttemptFailed { url: String, error: NetworkError },
    Completed { url: String, bytes: u64 },
    Verified { sha256: String },
    Extracted { dir: PathBuf, files: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchOutcome {
    pub url: String,
    pub bytes: u64,
    pub path: PathBuf,
    pub extracted_to: Option<PathBuf>,
}

pub type EventSink<'a> = &'a mut (dyn FnMut(FetchEvent) + Send);

enum AttemptError {
    Network(NetworkError),
    Fatal(FetchError),
}

impl From<NetworkError> for AttemptError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err)
    }
}

#[derive(Clone)]
pub struct ArtifactFetcher {
    client: Client,
    chunk_size: usize,
}

impl ArtifactFetcher {
    pub fn new(user_agent: &str, timeout: Duration, chunk_size: usize) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, FetchError> {
        Self::new(&cfg.user_agent, cfg.fetch_timeout(), cfg.chunk_size)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Downloads the first reachable candidate into `dest`.
    ///
    /// Any stale file at `dest` is removed first. A failed attempt removes its
    /// partial output, so exhausting every source leaves `dest` absent. A
    /// cancelled attempt keeps what it wrote.
    pub async fn fetch(
        &self,
        urls: &[String],
        dest: &Path,
        cancel: Option<&CancelRx>,
        on_event: EventSink<'_>,
    ) -> Result<u64, FetchError> {
        self.fetch_first(urls, dest, cancel, on_event)
            .await
            .map(|(_, bytes)| bytes)
    }

    /// Fetch plus digest verification and archive extraction.
    pub async fn fetch_spec(
        &self,
        spec: &DownloadSpec,
        cancel: Option<&CancelRx>,
        on_event: EventSink<'_>,
    ) -> Result<FetchOutcome, FetchError> {
        let (url, bytes) = match self
            .fetch_first(&spec.urls, &spec.destination, cancel, &mut *on_event)
            .await
        {
            Ok(done) => done,
            Err(FetchError::AllSourcesExhausted { attempts, .. }) => {
                return Err(FetchError::AllSourcesExhausted {
                    attempts,
                    fallback: spec.fallback_url.clone(),
                });
            }
            Err(err) => return Err(err),
        };

        if let Some(expected) = spec.sha256.as_deref() {
            let path = spec.destination.clone();
            let actual = tokio::task::spawn_blocking(move || sha256_file(&path))
                .await
                .map_err(|e| FetchError::io(&spec.destination, io::Error::other(e)))?
                .map_err(|e| FetchError::io(&spec.destination, e))?;
            if !digest_matches(expected, &actual) {
                return Err(FetchError::Integrity {
                    path: spec.destination.clone(),
                    reason: format!("sha256 mismatch: expected {expected}, got {actual}"),
                });
            }
            on_event(FetchEvent::Verified { sha256: actual });
        }

        let extracted_to = match spec.archive {
            ArchiveKind::None => None,
            ArchiveKind::Zip => {
                let archive = spec.destination.clone();
                let dir = spec.extraction_dir();
                let target = dir.clone();
                let files = tokio::task::spawn_blocking(move || extract_zip(&archive, &target))
                    .await
                    .map_err(|e| FetchError::io(&spec.destination, io::Error::other(e)))??;
                on_event(FetchEvent::Extracted {
                    dir: dir.clone(),
                    files,
                });
                Some(dir)
            }
        };

        Ok(FetchOutcome {
            url,
            bytes,
            path: spec.destination.clone(),
            extracted_to,
        })
    }

    async fn fetch_first(
        &self,
        urls: &[String],
        dest: &Path,
        cancel: Option<&CancelRx>,
        on_event: EventSink<'_>,
    ) -> Result<(String, u64), FetchError> {
        if urls.is_empty() {
            return Err(FetchError::NoSources);
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io(parent, e))?;
        }
        remove_if_exists(dest).await?;

        let mut attempts = Vec::new();
        for url in urls {
            if cancel_requested(cancel) {
                return Err(FetchError::Cancelled { bytes: 0 });
            }
            match self.attempt(url, dest, cancel, &mut *on_event).await {
                Ok(bytes) => {
                    info!("Downloaded {} ({} bytes) from {}", dest.display(), bytes, url);
                    on_event(FetchEvent::Completed {
                        url: url.clone(),
                        bytes,
                    });
                    return Ok((url.clone(), bytes));
                }
                Err(AttemptError::Network(error)) if cancel_requested(cancel) => {
                    warn!("Download from {url} stopped after cancel ({error})");
                    return Err(FetchError::Cancelled { bytes: 0 });
                }
                Err(AttemptError::Network(error)) => {
                    warn!("Download failed: {url} ({error})");
                    remove_if_exists(dest).await?;
                    on_event(FetchEvent::AttemptFailed {
                        url: url.clone(),
                        error: error.clone(),
                    });
                    attempts.push(AttemptFailure {
                        url: url.clone(),
                        error,
                    });
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
            }
        }

        Err(FetchError::AllSourcesExhausted {
            attempts,
            fallback: None,
        })
    }

    async fn attempt(
        &self,
        url: &str,
        dest: &Path,
        cancel: Option<&CancelRx>,
        on_event: EventSink<'_>,
    ) -> Result<u64, AttemptError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NetworkError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NetworkError::Status(resp.status().as_u16()).into());
        }

        let total = resp.content_length();
        on_event(FetchEvent::AttemptStarted {
            url: url.to_string(),
            total,
        });

        let mut file = fs::File::create(dest)
            .await
            .map_err(|e| AttemptError::Fatal(FetchError::io(dest, e)))?;
        let mut progress = ProgressBuckets::new(total);
        let mut buf: Vec<u8> = Vec::with_capacity(self.chunk_size);
        let mut stream = resp.bytes_stream();

        while let Some(piece) = stream.next().await {
            let piece = match piece {
                Ok(piece) => piece,
                // A cancelled download keeps its written chunks even if the
                // connection then drops.
                Err(_) if cancel_requested(cancel) => {
                    return Err(cancelled(&mut file, dest, progress.downloaded()).await);
                }
                Err(e) => return Err(NetworkError::Read(e.to_string()).into()),
            };
            let mut rest = &piece[..];
            while !rest.is_empty() {
                let take = (self.chunk_size - buf.len()).min(rest.len());
                buf.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if buf.len() == self.chunk_size {
                    write_chunk(&mut file, &mut buf, &mut progress, dest, &mut *on_event).await?;
                    if cancel_requested(cancel) {
                        return Err(cancelled(&mut file, dest, progress.downloaded()).await);
                    }
                }
            }
        }
        if !buf.is_empty() {
            write_chunk(&mut file, &mut buf, &mut progress, dest, &mut *on_event).await?;
            if cancel_requested(cancel) {
                return Err(cancelled(&mut file, dest, progress.downloaded()).await);
            }
        }

        file.flush()
            .await
            .map_err(|e| AttemptError::Fatal(FetchError::io(dest, e)))?;
        drop(file);

        if progress.downloaded() == 0 {
            return Err(NetworkError::EmptyBody.into());
        }
        Ok(progress.downloaded())
    }
}

async fn write_chunk(
    file: &mut fs::File,
    buf: &mut Vec<u8>,
    progress: &mut ProgressBuckets,
    dest: &Path,
    on_event: EventSink<'_>,
) -> Result<(), AttemptError> {
    file.write_all(buf)
        .await
        .map_err(|e| AttemptError::Fatal(FetchError::io(dest, e)))?;
    let written = buf.len() as u64;
    buf.clear();
    if let Some(percent) = progress.advance(written) {
        on_event(FetchEvent::Progress {
            percent,
            downloaded: progress.downloaded(),
            total: progress.total().unwrap_or_default(),
        });
    }
    Ok(())
}

async fn cancelled(file: &mut fs::File, dest: &Path, bytes: u64) -> AttemptError {
    if let Err(err) = file.flush().await {
        warn!("Failed to flush partial download {}: {}", dest.display(), err);
    }
    info!("Download of {} cancelled after {} bytes", dest.display(), bytes);
    AttemptError::Fatal(FetchError::Cancelled { bytes })
}

async fn remove_if_exists(path: &Path) -> Result<(), FetchError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(FetchError::io(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builders_fill_fields() {
        let spec = DownloadSpec::new(vec!["https://a/x.zip".into()], "/tmp/dl/x.zip")
            .zip("/tmp/tools")
            .with_sha256("abc")
            .with_fallback("https://vendor/page");

        assert_eq!(spec.archive, ArchiveKind::Zip);
        assert_eq!(spec.extraction_dir(), PathBuf::from("/tmp/tools"));
        assert_eq!(spec.sha256.as_deref(), Some("abc"));
        assert_eq!(spec.file_name(), "x.zip");
    }

    #[test]
    fn extraction_defaults_to_destination_dir() {
        let mut spec = DownloadSpec::new(vec![], "/data/drivers/google/google.zip");
        spec.archive = ArchiveKind::Zip;
        assert_eq!(spec.extraction_dir(), PathBuf::from("/data/drivers/google"));
    }

    #[tokio::test]
    async fn empty_url_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ArtifactFetcher::new("test", DEFAULT_TIMEOUT, 16).unwrap();
        let mut sink = |_e: FetchEvent| {};
        let err = fetcher
            .fetch(&[], &dir.path().join("out.bin"), None, &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NoSources));
    }
}
