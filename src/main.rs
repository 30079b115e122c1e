use anyhow::{Context, Result};
use audiobooker::audio::FfmpegTool;
use audiobooker::config::{
    BookMetadata, ChapterTemplate, Config, LogLevel, RunConfig, SilenceSettings, TrimBias,
};
use audiobooker::pipeline::{print_plan, print_summary, run_with_cancel};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audiobooker")]
#[command(version, about = "Download a streamed audiobook and split it into tagged chapter files")]
#[command(
    long_about = "Reads a HAR capture of an audiobook streaming session, downloads and reassembles \
                  the MP3 parts, detects chapter breaks from silences and exports one tagged MP3 per chapter."
)]
struct Cli {
    /// Base name for downloaded and exported files
    #[arg(long)]
    name: String,

    /// Title of the book
    #[arg(long)]
    title: String,

    /// Author of the book
    #[arg(long)]
    author: String,

    /// Narrator of the book
    #[arg(long)]
    narrator: String,

    /// HAR file captured while the book was playing
    #[arg(short = 'f', long, default_value = "libbyapp.com.har")]
    har_file: PathBuf,

    /// The book starts with an introduction
    #[arg(long)]
    has_introduction: bool,

    /// The book has a prologue (after the introduction, if any)
    #[arg(long)]
    has_prologue: bool,

    /// The book has an epilogue (before the conclusion, if any)
    #[arg(long)]
    has_epilogue: bool,

    /// The book ends with a conclusion
    #[arg(long)]
    has_conclusion: bool,

    /// Export one file per part instead of splitting on silences
    #[arg(long)]
    no_chapters: bool,

    /// Minimum silence length, in seconds, that separates two chapters
    #[arg(long, default_value = "3.5")]
    silence_duration_threshold: f64,

    /// Level, in dB, below which audio counts as silence
    #[arg(long, default_value = "-35", allow_hyphen_values = true)]
    silence_db_threshold: f64,

    /// Longest silence, in seconds, kept around a chapter break
    #[arg(long, default_value = "5")]
    maximum_silence: f64,

    /// Where retained silence goes: even, trailing
    #[arg(long, default_value = "even")]
    trim_bias: String,

    /// Keep silence at the very start and end of the book untouched
    #[arg(long)]
    no_trim_edges: bool,

    /// Number of concurrent downloads and exports
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Directory for downloaded segments and assembled parts
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Directory for exported tracks (defaults to the download directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Host serving the audio parts
    #[arg(long)]
    media_host: Option<String>,

    /// Logging level: info, debug, warning, error
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Hide progress bars
    #[arg(short, long)]
    quiet: bool,

    /// Plan the chapters and print them without exporting
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn build_run_config(cli: Cli, config: &Config) -> Result<RunConfig> {
    let trim_bias: TrimBias = cli
        .trim_bias
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let mut silence = SilenceSettings::from_secs(
        cli.silence_duration_threshold,
        cli.silence_db_threshold,
        cli.maximum_silence,
    )
    .context("Invalid silence settings")?;
    silence.trim_bias = trim_bias;
    silence.trim_edges = !cli.no_trim_edges;

    let download_dir = cli.download_dir.unwrap_or_else(|| config.download_dir.clone());
    let output_dir = cli
        .output_dir
        .or_else(|| config.output_dir.clone())
        .unwrap_or_else(|| download_dir.clone());

    Ok(RunConfig {
        name: cli.name,
        har_file: cli.har_file,
        book: BookMetadata {
            title: cli.title,
            author: cli.author,
            narrator: cli.narrator,
        },
        template: ChapterTemplate {
            has_introduction: cli.has_introduction,
            has_prologue: cli.has_prologue,
            has_epilogue: cli.has_epilogue,
            has_conclusion: cli.has_conclusion,
        },
        silence,
        no_chapters: cli.no_chapters,
        concurrency: cli.concurrency.unwrap_or(config.concurrency),
        download_dir,
        output_dir,
        media_host: cli.media_host.unwrap_or_else(|| config.media_host.clone()),
        max_retries: config.max_retries,
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        show_progress: !cli.quiet,
        dry_run: cli.dry_run,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level: LogLevel = cli
        .log_level
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    init_logging(log_level);

    // Load persistent defaults, then let the command line override them
    let config = Config::load().context("Failed to load configuration")?;
    let tool = Arc::new(FfmpegTool::new(&config.ffmpeg_path, &config.ffprobe_path));
    let run_config = build_run_config(cli, &config)?;
    run_config
        .validate()
        .context("Configuration validation failed")?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current stage");
        flag.store(true, Ordering::Relaxed);
    })
    .context("Failed to install Ctrl+C handler")?;

    info!("Book:     {}", run_config.book.title);
    info!("Author:   {}", run_config.book.author);
    info!("Narrator: {}", run_config.book.narrator);
    info!("HAR file: {}", run_config.har_file.display());

    let result = run_with_cancel(&run_config, tool, cancelled)
        .await
        .context("Audiobook generation failed")?;

    if run_config.dry_run {
        print_plan(&result.segments);
    }
    print_summary(&result);

    if let Some(report) = result.report.as_ref().filter(|r| !r.is_success()) {
        for err in report.errors() {
            error!("{err}");
        }
        anyhow::bail!("{} track(s) failed to export", report.failures.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Cli {
        let mut args = vec![
            "audiobooker",
            "--name",
            "book",
            "--title",
            "The Book",
            "--author",
            "Author",
            "--narrator",
            "Narrator",
        ];
        args.extend_from_slice(extra);
        Cli::parse_from(args)
    }

    #[test]
    fn test_defaults_fold_into_run_config() {
        let config = Config::default();
        let run = build_run_config(parse(&[]), &config).unwrap();

        assert_eq!(run.har_file, PathBuf::from("libbyapp.com.har"));
        assert_eq!(run.silence.min_duration, Duration::from_millis(3500));
        assert_eq!(run.silence.level_db, -35.0);
        assert_eq!(run.silence.max_silence, Duration::from_secs(5));
        assert_eq!(run.concurrency, 4);
        assert_eq!(run.output_dir, run.download_dir);
        assert!(run.silence.trim_edges);
        assert!(run.show_progress);
        assert!(run.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::default();
        let run = build_run_config(
            parse(&[
                "--silence-db-threshold",
                "-40",
                "--trim-bias",
                "trailing",
                "--has-prologue",
                "-c",
                "8",
                "-o",
                "out",
                "--quiet",
            ]),
            &config,
        )
        .unwrap();

        assert_eq!(run.silence.level_db, -40.0);
        assert_eq!(run.silence.trim_bias, TrimBias::Trailing);
        assert!(run.template.has_prologue);
        assert_eq!(run.concurrency, 8);
        assert_eq!(run.output_dir, PathBuf::from("out"));
        assert!(!run.show_progress);
    }

    #[test]
    fn test_no_chapters_with_template_is_rejected() {
        let config = Config::default();
        let run = build_run_config(parse(&["--no-chapters", "--has-epilogue"]), &config).unwrap();
        assert!(run.validate().is_err());
    }
}
