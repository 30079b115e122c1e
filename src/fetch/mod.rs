pub mod retry;

pub use retry::{classify, DownloadFailure, ErrorKind, RetryDecision, RetryPolicy};

use crate::config::RunConfig;
use crate::error::{AudiobookerError, Result};
use crate::har::{ByteRange, SegmentDescriptor};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// A segment persisted to local storage.
#[derive(Debug, Clone)]
pub struct FetchedSegment {
    pub descriptor: SegmentDescriptor,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Downloads capture segments with a bounded worker pool.
pub struct SegmentFetcher {
    client: reqwest::Client,
    download_dir: PathBuf,
    name: String,
    concurrency: usize,
    policy: RetryPolicy,
    show_progress: bool,
}

impl SegmentFetcher {
    pub fn new(config: &RunConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            download_dir: config.download_dir.clone(),
            name: config.name.clone(),
            concurrency: config.concurrency.max(1),
            policy: RetryPolicy::with_max_retries(config.max_retries),
            show_progress: config.show_progress,
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Local file for a descriptor, keyed by part and sequence.
    pub fn segment_path(&self, descriptor: &SegmentDescriptor) -> PathBuf {
        self.download_dir.join(format!(
            "{}_part{:02}_{:04}.mp3",
            self.name,
            descriptor.part_index + 1,
            descriptor.sequence_index
        ))
    }

    /// Fetch every descriptor. The first fatal failure aborts the stage.
    ///
    /// Results are ordered by (part, sequence) regardless of completion order.
    pub async fn fetch_all(&self, descriptors: Vec<SegmentDescriptor>) -> Result<Vec<FetchedSegment>> {
        fs::create_dir_all(&self.download_dir).await?;

        let total = descriptors.len();
        info!(
            "Downloading {} segment(s) with {} concurrent request(s)",
            total, self.concurrency
        );

        let progress_bar = if self.show_progress {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut futures = FuturesUnordered::new();

        for descriptor in descriptors {
            let sem = semaphore.clone();
            let pb = progress_bar.clone();

            futures.push(async move {
                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|e| AudiobookerError::Fetch(format!("Worker pool closed: {e}")))?;
                let fetched = self.fetch_one(descriptor).await;
                if let Some(ref pb) = pb {
                    pb.inc(1);
                }
                fetched
            });
        }

        let mut fetched = Vec::with_capacity(total);
        while let Some(result) = futures.next().await {
            match result {
                Ok(segment) => fetched.push(segment),
                Err(e) => {
                    if let Some(ref pb) = progress_bar {
                        pb.abandon_with_message("Download failed");
                    }
                    return Err(e);
                }
            }
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Downloads complete");
        }

        fetched.sort_by_key(|s| (s.descriptor.part_index, s.descriptor.sequence_index));
        info!(
            "Fetched {} segment(s), {} bytes",
            fetched.len(),
            fetched.iter().map(|s| s.bytes).sum::<u64>()
        );
        Ok(fetched)
    }

    async fn fetch_one(&self, descriptor: SegmentDescriptor) -> Result<FetchedSegment> {
        let path = self.segment_path(&descriptor);

        if let Ok(metadata) = fs::metadata(&path).await {
            if is_reusable(&descriptor, metadata.len()) {
                warn!("The {} file has already been downloaded", path.display());
                return Ok(FetchedSegment {
                    descriptor,
                    path,
                    bytes: metadata.len(),
                });
            }
            if metadata.len() > 0 {
                warn!(
                    "The {} file does not match the captured byte range ({} bytes), downloading it again",
                    path.display(),
                    metadata.len()
                );
            }
        }

        let mut attempt = 1u32;
        loop {
            debug!(
                "Downloading part {} segment {} (attempt {})",
                descriptor.part_index + 1,
                descriptor.sequence_index,
                attempt
            );

            match self.download(&descriptor, &path).await {
                Ok(bytes) => {
                    return Ok(FetchedSegment {
                        descriptor,
                        path,
                        bytes,
                    })
                }
                Err(failure) => {
                    let kind = classify(&failure);
                    match self.policy.decide(attempt, kind) {
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                "Attempt {} for {} failed: {}; retrying in {:?}",
                                attempt,
                                path.display(),
                                failure,
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        RetryDecision::NoRetry => {
                            return Err(fetch_error(&descriptor, kind, &failure));
                        }
                    }
                }
            }
        }
    }

    /// One attempt. The body goes to a `.partial` sibling that is renamed on success.
    async fn download(
        &self,
        descriptor: &SegmentDescriptor,
        path: &Path,
    ) -> std::result::Result<u64, DownloadFailure> {
        let mut request = self.client.get(&descriptor.url);
        if let Some(range) = descriptor.range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadFailure::Status(status.as_u16()));
        }
        if let Some(range) = descriptor.range {
            if status == StatusCode::OK && range.start != 0 {
                return Err(DownloadFailure::RangeIgnored);
            }
        }

        let partial = path.with_extension("mp3.partial");
        let written = match write_body(response, descriptor.range, &partial).await {
            Ok(received) => fs::rename(&partial, path).await.map(|_| received).map_err(DownloadFailure::from),
            Err(failure) => Err(failure),
        };
        if written.is_err() {
            let _ = fs::remove_file(&partial).await;
        }

        let received = written?;
        debug!("Wrote {} bytes to {}", received, path.display());
        Ok(received)
    }
}

/// An existing file stands in for a download only when it is exactly the captured range.
fn is_reusable(descriptor: &SegmentDescriptor, len: u64) -> bool {
    len > 0 && descriptor.range.and_then(|r| r.len()).map_or(true, |expected| expected == len)
}

/// Stream the response body into `partial`, stopping at the end of `range`.
async fn write_body(
    response: reqwest::Response,
    range: Option<ByteRange>,
    partial: &Path,
) -> std::result::Result<u64, DownloadFailure> {
    let expected_len = range.and_then(|r| r.len());
    let mut file = fs::File::create(partial).await?;
    let mut received = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        // A 200 reply to `bytes=0-N` carries the whole file; keep only the range.
        let chunk = match expected_len {
            Some(expected) if received + chunk.len() as u64 > expected => {
                &chunk[..(expected - received) as usize]
            }
            _ => &chunk[..],
        };
        file.write_all(chunk).await?;
        received += chunk.len() as u64;
        if expected_len == Some(received) {
            break;
        }
    }
    file.flush().await?;

    match expected_len {
        Some(expected) if received != expected => Err(DownloadFailure::ShortBody { expected, received }),
        _ => Ok(received),
    }
}

fn fetch_error(descriptor: &SegmentDescriptor, kind: ErrorKind, failure: &DownloadFailure) -> AudiobookerError {
    let what = format!(
        "part {} segment {}",
        descriptor.part_index + 1,
        descriptor.sequence_index
    );
    match kind {
        ErrorKind::Expired(code) => AudiobookerError::Fetch(format!(
            "The download link for {what} is expired or unauthorized (HTTP {code}). \
             Regenerate a new HAR file"
        )),
        _ => AudiobookerError::Fetch(format!("Failed to download {what}: {failure}")),
    }
}
