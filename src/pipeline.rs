use crate::audio::{assemble_parts, MediaTool, PartAssembler, SilenceDetector};
use crate::chapters::{format_timestamp, ChapterPlanner, OutputSegment, Timeline};
use crate::config::RunConfig;
use crate::error::{AudiobookerError, Result};
use crate::export::{ExportReport, Exporter};
use crate::fetch::SegmentFetcher;
use crate::har;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Statistics from one run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub total_time: Duration,
    pub fetch_time: Duration,
    pub assembly_time: Duration,
    pub detection_time: Duration,
    pub export_time: Duration,
    pub segments_fetched: usize,
    pub parts: usize,
    pub audio_duration: Duration,
    pub silences_detected: usize,
}

/// Result of a run.
#[derive(Debug)]
pub struct PipelineResult {
    /// The planned tracks, in order.
    pub segments: Vec<OutputSegment>,
    /// `None` for a dry run.
    pub report: Option<ExportReport>,
    pub stats: PipelineStats,
}

impl PipelineResult {
    /// True when every planned track was written (or nothing was meant to be).
    pub fn is_success(&self) -> bool {
        self.report.as_ref().map_or(true, ExportReport::is_success)
    }
}

fn check_cancelled(cancelled: &AtomicBool) -> Result<()> {
    if cancelled.load(Ordering::Relaxed) {
        return Err(AudiobookerError::Cancelled);
    }
    Ok(())
}

fn spinner(show: bool, message: &'static str) -> Option<ProgressBar> {
    show.then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    })
}

/// Run the whole pipeline: capture → download → assemble → detect → plan → export.
pub async fn run(config: &RunConfig, tool: Arc<dyn MediaTool>) -> Result<PipelineResult> {
    run_with_cancel(config, tool, Arc::new(AtomicBool::new(false))).await
}

/// Run the pipeline, stopping between stages once `cancelled` is set.
pub async fn run_with_cancel(
    config: &RunConfig,
    tool: Arc<dyn MediaTool>,
    cancelled: Arc<AtomicBool>,
) -> Result<PipelineResult> {
    let start_time = Instant::now();
    let mut stats = PipelineStats::default();

    config.validate()?;
    tool.check().await?;

    info!("Generating MP3 files for the {} audiobook", config.name);

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 1: Capture
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 1/6: Reading {}", config.har_file.display());
    let descriptors = har::load_segments(&config.har_file, &config.media_host)?;
    check_cancelled(&cancelled)?;

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 2: Download
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 2/6: Downloading {} segment(s)", descriptors.len());
    let fetch_start = Instant::now();
    let fetcher = SegmentFetcher::new(config)?;
    let fetched = fetcher.fetch_all(descriptors).await?;
    stats.fetch_time = fetch_start.elapsed();
    stats.segments_fetched = fetched.len();
    check_cancelled(&cancelled)?;

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 3: Assembly
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 3/6: Assembling parts");
    let assembly_start = Instant::now();
    let assembler = PartAssembler::new(&config.download_dir, &config.name);
    let parts = assemble_parts(&assembler, &fetched, tool.as_ref()).await?;
    let timeline = Timeline::from_parts(&parts);
    stats.assembly_time = assembly_start.elapsed();
    stats.parts = parts.len();
    stats.audio_duration = timeline.total();
    info!(
        "Assembled {} part(s), {} total",
        parts.len(),
        format_timestamp(timeline.total())
    );
    check_cancelled(&cancelled)?;

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 4: Silence detection
    // ═══════════════════════════════════════════════════════════════════════
    let silences = if config.no_chapters {
        info!("Stage 4/6: Skipping silence detection (--no-chapters)");
        Vec::new()
    } else {
        info!("Stage 4/6: Detecting silences");
        let detection_start = Instant::now();
        let pb = spinner(config.show_progress, "Detecting silences...");
        let detector = SilenceDetector::new(tool.clone(), config.silence.clone())?;
        let silences = detector.detect_all(&parts).await?;
        if let Some(pb) = pb {
            pb.finish_with_message(format!("✓ Found {} silence(s)", silences.len()));
        }
        stats.detection_time = detection_start.elapsed();
        silences
    };
    stats.silences_detected = silences.len();
    check_cancelled(&cancelled)?;

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 5: Chapter planning
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 5/6: Planning tracks");
    let segments = ChapterPlanner::from_config(config).plan(&timeline, &silences)?;
    info!("Planned {} track(s)", segments.len());

    if config.dry_run {
        info!("Stage 6/6: Skipping export (--dry-run)");
        stats.total_time = start_time.elapsed();
        return Ok(PipelineResult {
            segments,
            report: None,
            stats,
        });
    }
    check_cancelled(&cancelled)?;

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 6: Export
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 6/6: Exporting tracks");
    let exporter = Exporter::new(tool, config);
    let report = exporter.export_all(&segments, &parts).await?;
    stats.export_time = report.elapsed;
    stats.total_time = start_time.elapsed();

    Ok(PipelineResult {
        segments,
        report: Some(report),
        stats,
    })
}

/// Print the planned track table.
pub fn print_plan(segments: &[OutputSegment]) {
    println!();
    println!("  {:>5}  {:<16} {:>12}  {:>12}  {:>10}", "Track", "Label", "Start", "End", "Length");
    for segment in segments {
        println!(
            "  {:>5}  {:<16} {:>12}  {:>12}  {:>9.1}s",
            segment.ordinal,
            segment.label.to_string(),
            format_timestamp(segment.start),
            format_timestamp(segment.end),
            segment.duration().as_secs_f64()
        );
    }
    println!();
}

/// Print a summary of the run, including every failed track.
pub fn print_summary(result: &PipelineResult) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Audiobook Export Complete                 ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Parts:      {}", result.stats.parts);
    println!("  Segments:   {}", result.stats.segments_fetched);
    println!("  Silences:   {}", result.stats.silences_detected);
    println!("  Tracks:     {}", result.segments.len());
    println!(
        "  Duration:   {}",
        format_timestamp(result.stats.audio_duration)
    );
    println!();
    println!("  Timing:");
    println!("    Download:    {:.2}s", result.stats.fetch_time.as_secs_f64());
    println!("    Assemble:    {:.2}s", result.stats.assembly_time.as_secs_f64());
    println!("    Detect:      {:.2}s", result.stats.detection_time.as_secs_f64());
    println!("    Export:      {:.2}s", result.stats.export_time.as_secs_f64());
    println!("    Total:       {:.2}s", result.stats.total_time.as_secs_f64());

    match &result.report {
        None => {
            println!();
            println!("  Dry run: no tracks were written");
        }
        Some(report) => {
            println!();
            println!(
                "  Written:    {} of {}",
                style(report.exported.len()).green(),
                result.segments.len()
            );
            if !report.failures.is_empty() {
                println!("  {}", style(format!("Failed:     {}", report.failures.len())).red().bold());
                for failure in &report.failures {
                    println!(
                        "    {} {:>3} {}: {}",
                        style("✗").red(),
                        failure.ordinal,
                        failure.label,
                        failure.reason
                    );
                }
            }
        }
    }
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportFailure;

    #[test]
    fn test_dry_run_result_is_success() {
        let result = PipelineResult {
            segments: vec![],
            report: None,
            stats: PipelineStats::default(),
        };
        assert!(result.is_success());
    }

    #[test]
    fn test_failed_export_is_not_success() {
        let report = ExportReport {
            failures: vec![ExportFailure {
                ordinal: 1,
                label: "Prologue".to_string(),
                reason: "boom".to_string(),
            }],
            ..Default::default()
        };
        let result = PipelineResult {
            segments: vec![],
            report: Some(report),
            stats: PipelineStats::default(),
        };
        assert!(!result.is_success());
    }

    #[test]
    fn test_check_cancelled() {
        let flag = AtomicBool::new(false);
        assert!(check_cancelled(&flag).is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(matches!(check_cancelled(&flag), Err(AudiobookerError::Cancelled)));
    }
}
