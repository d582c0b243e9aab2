// src/fetch/http.rs

//! HTTP transport with retry support

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client, Response};
use std::fs::File;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the reachability probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds, scaled by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Blocking HTTP client wrapper
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Send a GET request, retrying transport failures
    ///
    /// Non-success statuses are returned as errors immediately; a 404 will not
    /// turn into a 200 by asking again.
    fn get_with_retry(&self, url: &str) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::DownloadError(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to fetch {url} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    /// Stream a URL into an already created file
    pub fn download_into(&self, url: &str, file: &mut File, show_progress: bool) -> Result<u64> {
        let mut response = self.get_with_retry(url)?;
        let total_size = response.content_length().unwrap_or(0);

        let progress_bar = show_progress.then(|| {
            let pb = ProgressBar::new(total_size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            let name = url.rsplit('/').next().unwrap_or(url).to_string();
            pb.set_message(name);
            pb
        });

        let mut downloaded: u64 = 0;
        let mut buffer = [0u8; STREAM_BUFFER_SIZE];
        loop {
            let bytes_read = response
                .read(&mut buffer)
                .map_err(|e| Error::DownloadError(format!("Failed to read response: {e}")))?;
            if bytes_read == 0 {
                break;
            }
            file.write_all(&buffer[..bytes_read])
                .map_err(|e| Error::IoError(format!("Failed to write data: {e}")))?;
            downloaded += bytes_read as u64;
            if let Some(pb) = &progress_bar {
                pb.set_position(downloaded);
            }
        }

        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }
        debug!("Downloaded {} bytes from {}", downloaded, url);
        Ok(downloaded)
    }

    /// Fetch a small object into memory
    pub fn download_to_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get_with_retry(url)?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {}", e)))?;
        Ok(bytes.to_vec())
    }

    /// Any HTTP answer from the server counts as reachable
    pub fn probe(&self, url: &str) -> bool {
        match self.client.head(url).timeout(PROBE_TIMEOUT).send() {
            Ok(response) => {
                debug!("Reachability probe {} answered {}", url, response.status());
                true
            }
            Err(e) => {
                debug!("Reachability probe {} failed: {}", url, e);
                false
            }
        }
    }
}
