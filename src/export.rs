use crate::audio::{ClipSource, MediaTool, Part, TrackTags};
use crate::chapters::OutputSegment;
use crate::config::{BookMetadata, RunConfig};
use crate::error::{AudiobookerError, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// A track written to disk.
#[derive(Debug, Clone)]
pub struct ExportedTrack {
    pub ordinal: usize,
    pub label: String,
    pub path: PathBuf,
    pub duration: Duration,
}

/// A track that could not be written.
#[derive(Debug, Clone)]
pub struct ExportFailure {
    pub ordinal: usize,
    pub label: String,
    pub reason: String,
}

impl From<ExportFailure> for AudiobookerError {
    fn from(failure: ExportFailure) -> Self {
        AudiobookerError::Export {
            ordinal: failure.ordinal,
            label: failure.label,
            reason: failure.reason,
        }
    }
}

/// Outcome of exporting every planned track.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub exported: Vec<ExportedTrack>,
    pub failures: Vec<ExportFailure>,
    pub elapsed: Duration,
}

impl ExportReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn errors(&self) -> Vec<AudiobookerError> {
        self.failures.iter().cloned().map(Into::into).collect()
    }
}

/// Cuts and tags one file per planned track.
pub struct Exporter {
    tool: Arc<dyn MediaTool>,
    output_dir: PathBuf,
    base_name: String,
    book: BookMetadata,
    concurrency: usize,
    show_progress: bool,
}

impl Exporter {
    pub fn new(tool: Arc<dyn MediaTool>, config: &RunConfig) -> Self {
        Self {
            tool,
            output_dir: config.output_dir.clone(),
            base_name: config.name.clone(),
            book: config.book.clone(),
            concurrency: config.concurrency.max(1),
            show_progress: config.show_progress,
        }
    }

    pub fn output_path(&self, segment: &OutputSegment, total: usize) -> PathBuf {
        self.output_dir.join(track_file_name(
            &self.base_name,
            segment.ordinal,
            total,
            &segment.label.to_string(),
        ))
    }

    /// Export every track. A failed track is recorded in the report and does
    /// not stop the others.
    pub async fn export_all(&self, segments: &[OutputSegment], parts: &[Part]) -> Result<ExportReport> {
        let start_time = Instant::now();
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let total = segments.len();
        info!(
            "Exporting {} track(s) to {} with {} concurrent job(s) using {}",
            total,
            self.output_dir.display(),
            self.concurrency,
            self.tool.name()
        );

        let progress_bar = if self.show_progress {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tracks ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut futures = FuturesUnordered::new();

        for segment in segments {
            let sem = semaphore.clone();
            let pb = progress_bar.clone();

            futures.push(async move {
                let permit = sem.acquire().await;
                let result = match permit {
                    Ok(_permit) => self.export_one(segment, parts, total).await,
                    Err(e) => Err(AudiobookerError::MediaTool(format!("Worker pool closed: {e}"))),
                };
                if let Some(ref pb) = pb {
                    pb.inc(1);
                }
                (segment, result)
            });
        }

        let mut report = ExportReport::default();
        while let Some((segment, result)) = futures.next().await {
            match result {
                Ok(path) => {
                    debug!("Track {} written to {}", segment.ordinal, path.display());
                    report.exported.push(ExportedTrack {
                        ordinal: segment.ordinal,
                        label: segment.label.to_string(),
                        path,
                        duration: segment.duration(),
                    });
                }
                Err(e) => {
                    let failure = ExportFailure {
                        ordinal: segment.ordinal,
                        label: segment.label.to_string(),
                        reason: e.to_string(),
                    };
                    warn!("{}", AudiobookerError::from(failure.clone()));
                    report.failures.push(failure);
                }
            }
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Export complete");
        }

        report.exported.sort_by_key(|t| t.ordinal);
        report.failures.sort_by_key(|f| f.ordinal);
        report.elapsed = start_time.elapsed();

        info!(
            "Exported {} of {} track(s) in {:.2}s",
            report.exported.len(),
            total,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    async fn export_one(&self, segment: &OutputSegment, parts: &[Part], total: usize) -> Result<PathBuf> {
        let sources = segment
            .spans
            .iter()
            .map(|span| {
                let part = parts.get(span.part_index).ok_or_else(|| {
                    AudiobookerError::MediaTool(format!("No assembled file for part {}", span.part_index + 1))
                })?;
                Ok(ClipSource {
                    path: part.path.clone(),
                    start: span.start,
                    end: span.end,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let tags = TrackTags {
            album: self.book.title.clone(),
            artist: self.book.author.clone(),
            narrator: self.book.narrator.clone(),
            title: segment.label.to_string(),
            track: segment.ordinal,
            total,
        };

        let output = self.output_path(segment, total);
        if output.exists() {
            warn!("Overwriting existing track {}", output.display());
        }
        info!("Generating {}", output.display());

        self.tool.extract_and_tag(&sources, &tags, &output).await?;
        Ok(output)
    }
}

/// `{base} - {ordinal} - {label}.mp3`, with the ordinal zero-padded to fit `total`.
pub fn track_file_name(base: &str, ordinal: usize, total: usize, label: &str) -> String {
    let width = total.to_string().len().max(2);
    format!(
        "{} - {:0width$} - {}.mp3",
        base,
        ordinal,
        sanitize_label(label),
        width = width
    )
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}
