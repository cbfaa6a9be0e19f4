// src/transport/mod.rs

//! Payload transport
//!
//! Fetches manifests and blobs from a bundle source, which may be a local
//! directory, a `file://` URL, or an HTTP(S) server. Remote fetches go
//! through a shared reqwest client with retry support; downloads always
//! stream to a temporary file and rename into place.

pub mod multicast;

use crate::error::{Error, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Interpret a source string as a local filesystem path, if it is one.
/// Anything that is not an `http://` or `https://` URL is treated as local;
/// `file://` URLs are stripped to their path.
pub fn local_path(source: &str) -> Option<PathBuf> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return None;
    }
    match source.strip_prefix("file://") {
        Some(path) => Some(PathBuf::from(path)),
        None => Some(PathBuf::from(source)),
    }
}

/// Resolve the base of a bundle source: the directory holding the manifest.
/// A source naming a `.json` file resolves to its parent; a directory (or
/// URL without a `.json` tail) is already the base.
pub fn source_base(source: &str) -> String {
    if let Some(path) = local_path(source) {
        if path.extension().is_some_and(|e| e == "json") {
            return path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .display()
                .to_string();
        }
        return path.display().to_string();
    }
    let trimmed = source.trim_end_matches('/');
    if trimmed.ends_with(".json") {
        match trimmed.rsplit_once('/') {
            Some((base, _)) => base.to_string(),
            None => trimmed.to_string(),
        }
    } else {
        trimmed.to_string()
    }
}

/// Join a blob or manifest name onto a source base
pub fn join_source(base: &str, name: &str) -> String {
    if let Some(path) = local_path(base) {
        return path.join(name).display().to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), name)
}

fn stream_response_to_file(
    mut response: reqwest::blocking::Response,
    file: &mut File,
    progress_bar: Option<&ProgressBar>,
) -> Result<u64> {
    if let Some(pb) = progress_bar {
        if let Some(total) = response.content_length() {
            pb.set_length(total);
        }
    }

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    loop {
        let bytes_read = response.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
        if let Some(pb) = progress_bar {
            pb.set_position(downloaded);
        }
    }
    Ok(downloaded)
}

/// Shared fetcher for manifests and blobs
pub struct Transport {
    client: Client,
    max_retries: u32,
}

impl Transport {
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Fetch a small resource fully into memory (manifests, metadata)
    pub fn fetch_bytes(&self, source: &str) -> Result<Vec<u8>> {
        if let Some(path) = local_path(source) {
            return fs::read(&path).map_err(|_| Error::InputNotFound(path));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(source).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::RemoteFetchFailure(format!(
                            "HTTP {} from {}",
                            response.status(),
                            source
                        )));
                    }
                    return Ok(response.bytes()?.to_vec());
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::RemoteFetchFailure(format!(
                            "failed to fetch {source} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying", attempt, source, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    /// Open a resource as a streaming reader. Local sources open the file
    /// directly; remote sources stream the response body.
    pub fn fetch_stream(&self, source: &str) -> Result<Box<dyn Read>> {
        if let Some(path) = local_path(source) {
            let file = File::open(&path).map_err(|_| Error::InputNotFound(path))?;
            return Ok(Box::new(file));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(source).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::RemoteFetchFailure(format!(
                            "HTTP {} from {}",
                            response.status(),
                            source
                        )));
                    }
                    return Ok(Box::new(response));
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::RemoteFetchFailure(format!(
                            "failed to open {source} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying", attempt, source, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    /// Download a resource to `dest_path`, streaming through a temporary
    /// file and renaming into place. Remote downloads show a progress bar
    /// when the size is known.
    pub fn fetch_to(&self, source: &str, dest_path: &Path) -> Result<u64> {
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Some(path) = local_path(source) {
            if !path.is_file() {
                return Err(Error::InputNotFound(path));
            }
            return Ok(fs::copy(&path, dest_path)?);
        }

        info!("Downloading {} to {}", source, dest_path.display());
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(source).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::RemoteFetchFailure(format!(
                            "HTTP {} from {}",
                            response.status(),
                            source
                        )));
                    }

                    let pb = ProgressBar::new(0);
                    pb.set_style(
                        ProgressStyle::with_template(
                            "{bar:40.cyan/blue} {bytes}/{total_bytes} {bytes_per_sec}",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                    );

                    let temp_path = dest_path.with_extension("tmp");
                    let mut file = File::create(&temp_path)?;
                    let downloaded = stream_response_to_file(response, &mut file, Some(&pb))?;
                    pb.finish_and_clear();

                    fs::rename(&temp_path, dest_path)?;
                    return Ok(downloaded);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::RemoteFetchFailure(format!(
                            "failed to download {source} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}
