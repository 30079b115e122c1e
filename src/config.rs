use crate::error::{AudiobookerError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default host serving the audiobook MP3 parts.
pub const DEFAULT_MEDIA_HOST: &str = "odrmediaclips.cachefly.net";

/// Where retained silence goes when a long boundary silence is trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimBias {
    /// Split the retained silence between the end of one track and the start of the next.
    #[default]
    Even,
    /// Keep all retained silence at the end of the earlier track.
    Trailing,
}

impl std::fmt::Display for TrimBias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrimBias::Even => write!(f, "even"),
            TrimBias::Trailing => write!(f, "trailing"),
        }
    }
}

impl std::str::FromStr for TrimBias {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "even" => Ok(TrimBias::Even),
            "trailing" => Ok(TrimBias::Trailing),
            _ => Err(format!("Unknown trim bias: {}. Use 'even' or 'trailing'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Debug,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!(
                "Unknown log level: {}. Use 'info', 'debug', 'warning' or 'error'",
                s
            )),
        }
    }
}

/// Which structural sections the book has, outside the numbered chapters.
///
/// Ordering is fixed: introduction, prologue, body, epilogue, conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChapterTemplate {
    pub has_introduction: bool,
    pub has_prologue: bool,
    pub has_epilogue: bool,
    pub has_conclusion: bool,
}

impl ChapterTemplate {
    /// Number of structural sections that must be matched to raw segments.
    pub fn enabled_count(&self) -> usize {
        [
            self.has_introduction,
            self.has_prologue,
            self.has_epilogue,
            self.has_conclusion,
        ]
        .iter()
        .filter(|&&flag| flag)
        .count()
    }

    pub fn any(&self) -> bool {
        self.enabled_count() > 0
    }
}

/// Silence detection and trimming parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SilenceSettings {
    /// Minimum silence length that counts as a chapter boundary.
    pub min_duration: Duration,
    /// Loudness ceiling in dBFS below which audio is silence (negative).
    pub level_db: f64,
    /// Longest stretch of silence kept in the output around a boundary.
    pub max_silence: Duration,
    pub trim_bias: TrimBias,
    /// Trim silence at the very start and end of the book to `max_silence`.
    pub trim_edges: bool,
}

impl Default for SilenceSettings {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_millis(3500),
            level_db: -35.0,
            max_silence: Duration::from_secs(5),
            trim_bias: TrimBias::default(),
            trim_edges: true,
        }
    }
}

impl SilenceSettings {
    /// Build settings from raw command-line numbers, rejecting values that
    /// cannot be represented as durations.
    pub fn from_secs(min_duration: f64, level_db: f64, max_silence: f64) -> Result<Self> {
        let min_duration = secs_to_duration("silence duration threshold", min_duration)?;
        let max_silence = secs_to_duration("maximum silence", max_silence)?;
        Ok(Self {
            min_duration,
            level_db,
            max_silence,
            ..Default::default()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_duration.is_zero() {
            return Err(AudiobookerError::Config(
                "Silence duration threshold must be greater than 0".to_string(),
            ));
        }
        if !self.level_db.is_finite() || self.level_db >= 0.0 {
            return Err(AudiobookerError::Config(format!(
                "Silence level threshold must be below 0 dB, got {}",
                self.level_db
            )));
        }
        if self.max_silence <= self.min_duration {
            return Err(AudiobookerError::Config(format!(
                "Maximum silence ({:.2}s) must be longer than the silence duration threshold ({:.2}s)",
                self.max_silence.as_secs_f64(),
                self.min_duration.as_secs_f64()
            )));
        }
        Ok(())
    }
}

fn secs_to_duration(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        AudiobookerError::Config(format!("{name} must be a non-negative number, got {secs}"))
    })
}

/// Tags written into every exported track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub narrator: String,
}

/// Persistent defaults, loaded from the config file and environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub concurrency: usize,
    pub download_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub media_host: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 4,
            download_dir: PathBuf::from("download"),
            output_dir: None,
            media_host: DEFAULT_MEDIA_HOST.to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            max_retries: 3,
            request_timeout_secs: 60,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    AudiobookerError::Config(format!(
                        "Failed to parse {}: {e}",
                        config_path.display()
                    ))
                })?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(concurrency) = std::env::var("AUDIOBOOKER_CONCURRENCY") {
            if let Ok(c) = concurrency.parse() {
                self.concurrency = c;
            }
        }
        if let Ok(dir) = std::env::var("AUDIOBOOKER_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
        if let Ok(host) = std::env::var("AUDIOBOOKER_MEDIA_HOST") {
            self.media_host = host;
        }
        if let Ok(ffmpeg) = std::env::var("AUDIOBOOKER_FFMPEG") {
            self.ffmpeg_path = ffmpeg;
        }
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("audiobooker").join("config.toml"))
    }
}

/// Everything a run needs, fixed once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Base name used for downloaded and exported files.
    pub name: String,
    pub har_file: PathBuf,
    pub book: BookMetadata,
    pub template: ChapterTemplate,
    pub silence: SilenceSettings,
    /// One track per part, no silence detection.
    pub no_chapters: bool,
    pub concurrency: usize,
    pub download_dir: PathBuf,
    pub output_dir: PathBuf,
    pub media_host: String,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub show_progress: bool,
    /// Stop after planning the chapters; nothing is exported.
    pub dry_run: bool,
}

impl RunConfig {
    /// Reject invalid or contradictory settings before any network or tool call.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("title", &self.book.title),
            ("author", &self.book.author),
            ("narrator", &self.book.narrator),
        ] {
            if value.trim().is_empty() {
                return Err(AudiobookerError::Config(format!("--{field} must not be empty")));
            }
        }

        if self.name.contains(['/', '\\']) {
            return Err(AudiobookerError::Config(format!(
                "--name must not contain path separators: {}",
                self.name
            )));
        }

        if self.concurrency == 0 {
            return Err(AudiobookerError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        if self.no_chapters && self.template.any() {
            return Err(AudiobookerError::Config(
                "--no-chapters cannot be combined with --has-introduction, --has-prologue, \
                 --has-epilogue or --has-conclusion"
                    .to_string(),
            ));
        }

        if self.media_host.trim().is_empty() {
            return Err(AudiobookerError::Config(
                "Media host must not be empty".to_string(),
            ));
        }

        self.silence.validate()
    }
}
