pub mod assemble;
pub mod ffmpeg;
pub mod silence;

pub use assemble::{assemble_parts, PartAssembler};
pub use ffmpeg::{parse_silencedetect, FfmpegTool};
pub use silence::{normalize_intervals, SilenceDetector};

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One streamed part, assembled from its fetched segments.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub index: usize,
    pub path: PathBuf,
    pub duration: Duration,
    pub bytes: u64,
}

/// A silence detected inside a part, relative to the start of that part.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceInterval {
    pub part_index: usize,
    pub start: Duration,
    pub end: Duration,
}

impl SilenceInterval {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// A time range of one part's audio file.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipSource {
    pub path: PathBuf,
    pub start: Duration,
    pub end: Duration,
}

impl ClipSource {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Tags written into one exported track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub album: String,
    pub artist: String,
    pub narrator: String,
    pub title: String,
    pub track: usize,
    pub total: usize,
}

impl TrackTags {
    /// `-metadata key=value` pairs for FFmpeg.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let pairs = [
            ("album", self.album.clone()),
            ("title", self.title.clone()),
            ("artist", self.artist.clone()),
            ("album_artist", self.artist.clone()),
            ("composer", self.narrator.clone()),
            ("track", format!("{}/{}", self.track, self.total)),
            ("genre", "Audiobook".to_string()),
        ];
        pairs
            .into_iter()
            .flat_map(|(key, value)| ["-metadata".to_string(), format!("{key}={value}")])
            .collect()
    }
}

/// External media capability used for probing parts, detecting silence and cutting tracks.
#[async_trait]
pub trait MediaTool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Verify the tool is installed and runnable.
    async fn check(&self) -> Result<()> {
        Ok(())
    }

    async fn probe_duration(&self, path: &Path) -> Result<Duration>;

    /// Raw silences of `part`, part-relative, in the order the tool reports them.
    async fn detect_silence(
        &self,
        part: &Part,
        level_db: f64,
        min_duration: Duration,
    ) -> Result<Vec<SilenceInterval>>;

    /// Cut `sources` (joined in order) into `output` and tag it.
    async fn extract_and_tag(&self, sources: &[ClipSource], tags: &TrackTags, output: &Path) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_interval_duration() {
        let interval = SilenceInterval {
            part_index: 0,
            start: Duration::from_secs(10),
            end: Duration::from_millis(13_500),
        };
        assert_eq!(interval.duration(), Duration::from_millis(3500));
    }

    #[test]
    fn test_track_tags_ffmpeg_args() {
        let tags = TrackTags {
            album: "The Book".to_string(),
            artist: "A. Author".to_string(),
            narrator: "N. Narrator".to_string(),
            title: "Chapter 1".to_string(),
            track: 2,
            total: 12,
        };
        let args = tags.ffmpeg_args();
        assert_eq!(args.len(), 14);
        assert_eq!(args[0], "-metadata");
        assert!(args.contains(&"album=The Book".to_string()));
        assert!(args.contains(&"composer=N. Narrator".to_string()));
        assert!(args.contains(&"track=2/12".to_string()));
        assert!(args.contains(&"title=Chapter 1".to_string()));
    }
}
