use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{AudiobookerError, Result};

use super::{ClipSource, MediaTool, Part, SilenceInterval, TrackTags};

/// [`MediaTool`] backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegTool {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn build_extract_command(&self, sources: &[ClipSource], tags: &TrackTags, output: &Path) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command.args(["-y", "-hide_banner", "-loglevel", "error"]);

        for source in sources {
            command
                .arg("-ss")
                .arg(format!("{:.3}", source.start.as_secs_f64()))
                .arg("-t")
                .arg(format!("{:.3}", source.duration().as_secs_f64()))
                .arg("-i")
                .arg(&source.path);
        }

        if sources.len() == 1 {
            command.args(["-map", "0:a", "-c", "copy"]);
        } else {
            // Clips from different parts are joined and re-encoded.
            let inputs: String = (0..sources.len()).map(|i| format!("[{i}:a]")).collect();
            command
                .arg("-filter_complex")
                .arg(format!("{inputs}concat=n={}:v=0:a=1[out]", sources.len()))
                .args(["-map", "[out]", "-c:a", "libmp3lame", "-q:a", "2"]);
        }

        command
            .args(["-map_metadata", "-1", "-id3v2_version", "3"])
            .args(tags.ffmpeg_args())
            .arg(output);
        command
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    fn name(&self) -> &'static str {
        "FFmpeg"
    }

    async fn check(&self) -> Result<()> {
        for binary in [&self.ffmpeg, &self.ffprobe] {
            let output = Command::new(binary)
                .arg("-version")
                .output()
                .await
                .map_err(|e| {
                    AudiobookerError::MediaTool(format!(
                        "{binary} not found. Install FFmpeg (apt install ffmpeg / brew install ffmpeg) \
                         and ensure it's in your PATH. Error: {e}"
                    ))
                })?;

            if !output.status.success() {
                return Err(AudiobookerError::MediaTool(format!("{binary} check failed")));
            }
        }

        debug!("FFmpeg and FFprobe are available");
        Ok(())
    }

    async fn probe_duration(&self, path: &Path) -> Result<Duration> {
        if !path.exists() {
            return Err(AudiobookerError::FileNotFound(path.display().to_string()));
        }

        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| AudiobookerError::MediaTool(format!("Failed to run FFprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AudiobookerError::MediaTool(format!("FFprobe failed: {stderr}")));
        }

        let duration_str = String::from_utf8_lossy(&output.stdout);
        let duration_secs: f64 = duration_str.trim().parse().map_err(|e| {
            AudiobookerError::MediaTool(format!(
                "Failed to parse duration '{}': {e}",
                duration_str.trim()
            ))
        })?;

        Duration::try_from_secs_f64(duration_secs).map_err(|e| {
            AudiobookerError::MediaTool(format!("Invalid duration {duration_secs}: {e}"))
        })
    }

    async fn detect_silence(
        &self,
        part: &Part,
        level_db: f64,
        min_duration: Duration,
    ) -> Result<Vec<SilenceInterval>> {
        info!(
            "Detecting silences in {} (noise={}dB, duration={:.2}s)",
            part.path.display(),
            level_db,
            min_duration.as_secs_f64()
        );

        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostats", "-i"])
            .arg(&part.path)
            .arg("-af")
            .arg(format!(
                "silencedetect=n={}dB:d={:.3}",
                level_db,
                min_duration.as_secs_f64()
            ))
            .args(["-f", "null", "-"])
            .stdout(Stdio::null())
            .output()
            .await
            .map_err(|e| AudiobookerError::MediaTool(format!("Failed to run FFmpeg: {e}")))?;

        // silencedetect reports on stderr
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(AudiobookerError::MediaTool(format!(
                "FFmpeg silence detection failed for {}: {}",
                part.path.display(),
                stderr.lines().last().unwrap_or_default()
            )));
        }

        Ok(parse_silencedetect(&stderr, part.index, part.duration))
    }

    async fn extract_and_tag(&self, sources: &[ClipSource], tags: &TrackTags, output: &Path) -> Result<()> {
        if sources.is_empty() {
            return Err(AudiobookerError::MediaTool("No audio to extract".to_string()));
        }
        if let Some(missing) = sources.iter().find(|s| !s.path.exists()) {
            return Err(AudiobookerError::FileNotFound(missing.path.display().to_string()));
        }

        debug!(
            "Extracting {} clip(s) into {}",
            sources.len(),
            output.display()
        );

        let result = self
            .build_extract_command(sources, tags, output)
            .stdout(Stdio::null())
            .output()
            .await
            .map_err(|e| AudiobookerError::MediaTool(format!("Failed to run FFmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(AudiobookerError::MediaTool(format!(
                "FFmpeg exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        if !output.exists() {
            return Err(AudiobookerError::MediaTool(
                "Output file was not created".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse `silencedetect` filter output into part-relative intervals.
///
/// A `silence_start` without a matching `silence_end` runs to `part_duration`.
pub fn parse_silencedetect(output: &str, part_index: usize, part_duration: Duration) -> Vec<SilenceInterval> {
    let re = Regex::new(r"silence_(start|end):\s*(-?[\d.]+)").expect("Invalid regex");

    let mut intervals = Vec::new();
    let mut open: Option<Duration> = None;

    for caps in re.captures_iter(output) {
        let Ok(secs) = caps[2].parse::<f64>() else {
            continue;
        };
        // silencedetect can report slightly negative starts at 0
        let at = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or_default();

        match &caps[1] {
            "start" => open = Some(at),
            _ => {
                if let Some(start) = open.take() {
                    intervals.push(SilenceInterval {
                        part_index,
                        start,
                        end: at,
                    });
                }
            }
        }
    }

    if let Some(start) = open {
        if part_duration > start {
            intervals.push(SilenceInterval {
                part_index,
                start,
                end: part_duration,
            });
        }
    }

    intervals
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SAMPLE: &str = "\
Input #0, mp3, from 'book_part01.mp3':
  Duration: 01:00:00.05, start: 0.025057, bitrate: 64 kb/s
[silencedetect @ 0x55d0c8a1b2c0] silence_start: -0.0123
[silencedetect @ 0x55d0c8a1b2c0] silence_end: 1.2 | silence_duration: 1.2123
[silencedetect @ 0x55d0c8a1b2c0] silence_start: 612.48
[silencedetect @ 0x55d0c8a1b2c0] silence_end: 616.9 | silence_duration: 4.42
[silencedetect @ 0x55d0c8a1b2c0] silence_start: 3597.5
size=N/A time=01:00:00.05 bitrate=N/A speed= 612x
";

    #[test]
    fn test_parse_silencedetect() {
        let intervals = parse_silencedetect(SAMPLE, 2, Duration::from_secs(3600));
        assert_eq!(intervals.len(), 3);

        assert_eq!(intervals[0].start, Duration::ZERO);
        assert_eq!(intervals[0].end, Duration::from_millis(1200));

        assert_eq!(intervals[1].start, Duration::from_millis(612_480));
        assert_eq!(intervals[1].end, Duration::from_millis(616_900));

        // Trailing silence runs to the end of the part
        assert_eq!(intervals[2].start, Duration::from_millis(3_597_500));
        assert_eq!(intervals[2].end, Duration::from_secs(3600));
        assert!(intervals.iter().all(|i| i.part_index == 2));
    }

    #[test]
    fn test_parse_silencedetect_empty() {
        let intervals = parse_silencedetect("no silence here", 0, Duration::from_secs(10));
        assert!(intervals.is_empty());
    }

    #[test]
    fn test_extract_command_single_source_copies() {
        let tool = FfmpegTool::default();
        let tags = TrackTags {
            album: "Book".to_string(),
            artist: "Author".to_string(),
            narrator: "Narrator".to_string(),
            title: "Prologue".to_string(),
            track: 1,
            total: 3,
        };
        let sources = vec![ClipSource {
            path: PathBuf::from("part01.mp3"),
            start: Duration::from_millis(1500),
            end: Duration::from_secs(100),
        }];
        let command = tool.build_extract_command(&sources, &tags, Path::new("out.mp3"));
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.windows(2).any(|w| w == ["-ss", "1.500"]));
        assert!(args.windows(2).any(|w| w == ["-t", "98.500"]));
        assert!(args.windows(2).any(|w| w == ["-c", "copy"]));
        assert!(args.contains(&"title=Prologue".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp3"));
    }

    #[test]
    fn test_extract_command_multiple_sources_concat() {
        let tool = FfmpegTool::default();
        let tags = TrackTags {
            album: "Book".to_string(),
            artist: "Author".to_string(),
            narrator: "Narrator".to_string(),
            title: "Chapter 4".to_string(),
            track: 5,
            total: 9,
        };
        let sources = vec![
            ClipSource {
                path: PathBuf::from("part01.mp3"),
                start: Duration::from_secs(3000),
                end: Duration::from_secs(3600),
            },
            ClipSource {
                path: PathBuf::from("part02.mp3"),
                start: Duration::ZERO,
                end: Duration::from_secs(200),
            },
        ];
        let command = tool.build_extract_command(&sources, &tags, Path::new("out.mp3"));
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&"[0:a][1:a]concat=n=2:v=0:a=1[out]".to_string()));
        assert!(args.contains(&"libmp3lame".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
    }

    #[tokio::test]
    async fn test_probe_duration_file_not_found() {
        let tool = FfmpegTool::default();
        let result = tool.probe_duration(Path::new("/nonexistent/part.mp3")).await;
        match result {
            Err(AudiobookerError::FileNotFound(path)) => assert!(path.contains("nonexistent")),
            other => panic!("Expected FileNotFound error, got: {other:?}"),
        }
    }
}
