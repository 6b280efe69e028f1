//! Software bundle downloader
//!
//! Streams an artifact to the configured bundle location, hashing the bytes
//! as they are written.

use std::path::Path;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::trace;

use crate::errors::AgentError;
use crate::http::client::DdiClient;

/// Abort when throughput stays below this many bytes per second...
const LOW_SPEED_LIMIT: u64 = 100;
/// ...for this long.
const LOW_SPEED_TIME: Duration = Duration::from_secs(60);

/// Result of a completed bundle download.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Hex SHA-1 of the bytes written to disk
    pub sha1_hex: String,

    /// Average transfer speed in bytes per second
    pub bytes_per_sec: f64,
}

impl DdiClient {
    /// Download `url` to `target`, truncating any existing file.
    ///
    /// `expected_size` only feeds the progress trace; the caller compares
    /// the returned checksum against the advertised one.
    pub async fn download(
        &self,
        url: &str,
        target: &Path,
        expected_size: u64,
    ) -> Result<DownloadOutcome, AgentError> {
        let mut file = File::create(target).await?;

        let response = self
            .download_client()
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut checksum = Sha1::new();
        let started = Instant::now();
        let mut written: u64 = 0;
        let mut window_started = Instant::now();
        let mut window_bytes: u64 = 0;

        loop {
            // A stream producing nothing for a whole window counts as a slow
            // transfer just like a trickling one.
            let chunk = match timeout(LOW_SPEED_TIME, stream.next()).await {
                Err(_) => return Err(slow_transfer()),
                Ok(None) => break,
                Ok(Some(chunk)) => chunk.map_err(AgentError::Transport)?,
            };

            file.write_all(&chunk).await?;
            checksum.update(&chunk);
            written += chunk.len() as u64;
            window_bytes += chunk.len() as u64;

            if window_started.elapsed() >= LOW_SPEED_TIME {
                if window_bytes < LOW_SPEED_LIMIT * LOW_SPEED_TIME.as_secs() {
                    return Err(slow_transfer());
                }
                window_started = Instant::now();
                window_bytes = 0;
            }

            if expected_size > 0 {
                trace!(
                    "Bytes downloaded: {} ({:.0} %)",
                    written,
                    written as f64 / expected_size as f64 * 100.0
                );
            }
        }

        file.flush().await?;

        let elapsed = started.elapsed().as_secs_f64();
        let bytes_per_sec = if elapsed > 0.0 {
            written as f64 / elapsed
        } else {
            written as f64
        };

        Ok(DownloadOutcome {
            sha1_hex: hex::encode(checksum.finalize()),
            bytes_per_sec,
        })
    }
}

fn slow_transfer() -> AgentError {
    AgentError::Download(format!(
        "transfer stayed below {} B/s for {} s",
        LOW_SPEED_LIMIT,
        LOW_SPEED_TIME.as_secs()
    ))
}
