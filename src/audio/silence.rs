use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::SilenceSettings;
use crate::error::Result;

use super::{MediaTool, Part, SilenceInterval};

/// Runs silence detection over assembled parts.
pub struct SilenceDetector {
    tool: Arc<dyn MediaTool>,
    settings: SilenceSettings,
}

impl SilenceDetector {
    /// Fails with a configuration error if the thresholds are unusable.
    pub fn new(tool: Arc<dyn MediaTool>, settings: SilenceSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { tool, settings })
    }

    /// Detect silences in one part, sorted and non-overlapping.
    pub async fn detect(&self, part: &Part) -> Result<Vec<SilenceInterval>> {
        let raw = self
            .tool
            .detect_silence(part, self.settings.level_db, self.settings.min_duration)
            .await?;
        let intervals = normalize_intervals(raw, part.duration);

        info!(
            "Located {} silence period(s) in part {}",
            intervals.len(),
            part.index + 1
        );
        for interval in &intervals {
            debug!(
                "  part {}: {:.2}s - {:.2}s",
                part.index + 1,
                interval.start.as_secs_f64(),
                interval.end.as_secs_f64()
            );
        }
        Ok(intervals)
    }

    /// Detect silences in every part, in part order.
    pub async fn detect_all(&self, parts: &[Part]) -> Result<Vec<SilenceInterval>> {
        let mut all = Vec::new();
        for part in parts {
            all.extend(self.detect(part).await?);
        }
        Ok(all)
    }
}

/// Sort intervals by start, clamp them to the part, and merge overlaps.
///
/// Empty or inverted intervals are dropped.
pub fn normalize_intervals(mut intervals: Vec<SilenceInterval>, part_duration: Duration) -> Vec<SilenceInterval> {
    for interval in &mut intervals {
        if !part_duration.is_zero() {
            interval.end = interval.end.min(part_duration);
        }
    }
    intervals.retain(|i| i.end > i.start);
    intervals.sort_by_key(|i| i.start);

    let mut merged: Vec<SilenceInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ClipSource, TrackTags};
    use crate::error::AudiobookerError;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    fn interval(start_ms: u64, end_ms: u64) -> SilenceInterval {
        SilenceInterval {
            part_index: 0,
            start: Duration::from_millis(start_ms),
            end: Duration::from_millis(end_ms),
        }
    }

    struct CannedTool(Vec<SilenceInterval>);

    #[async_trait]
    impl MediaTool for CannedTool {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn probe_duration(&self, _path: &Path) -> Result<Duration> {
            Ok(Duration::from_secs(100))
        }

        async fn detect_silence(&self, part: &Part, _level_db: f64, _min: Duration) -> Result<Vec<SilenceInterval>> {
            Ok(self
                .0
                .iter()
                .map(|i| SilenceInterval {
                    part_index: part.index,
                    ..*i
                })
                .collect())
        }

        async fn extract_and_tag(
            &self,
            _sources: &[ClipSource],
            _tags: &TrackTags,
            _output: &Path,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_normalize_sorts_and_merges() {
        let raw = vec![
            interval(50_000, 55_000),
            interval(10_000, 14_000),
            interval(12_000, 16_000),
            interval(30_000, 30_000),
        ];
        let normalized = normalize_intervals(raw, Duration::from_secs(100));
        assert_eq!(normalized, vec![interval(10_000, 16_000), interval(50_000, 55_000)]);
    }

    #[test]
    fn test_normalize_clamps_to_part() {
        let normalized = normalize_intervals(vec![interval(98_000, 104_000)], Duration::from_secs(100));
        assert_eq!(normalized, vec![interval(98_000, 100_000)]);
    }

    #[test]
    fn test_detector_rejects_bad_thresholds() {
        let settings = SilenceSettings {
            max_silence: Duration::from_secs(2),
            ..Default::default()
        };
        let result = SilenceDetector::new(Arc::new(CannedTool(vec![])), settings);
        assert!(matches!(result, Err(AudiobookerError::Config(_))));
    }

    #[tokio::test]
    async fn test_detect_all_keeps_part_order() {
        let tool = CannedTool(vec![interval(40_000, 45_000), interval(5_000, 9_000)]);
        let detector = SilenceDetector::new(Arc::new(tool), SilenceSettings::default()).unwrap();
        let parts: Vec<Part> = (0..2)
            .map(|index| Part {
                index,
                path: PathBuf::from(format!("part{index}.mp3")),
                duration: Duration::from_secs(100),
                bytes: 0,
            })
            .collect();

        let all = detector.detect_all(&parts).await.unwrap();
        let keys: Vec<(usize, u64)> = all
            .iter()
            .map(|i| (i.part_index, i.start.as_secs()))
            .collect();
        assert_eq!(keys, vec![(0, 5), (0, 40), (1, 5), (1, 40)]);
    }
}
