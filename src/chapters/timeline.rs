use std::time::Duration;

use crate::audio::{Part, SilenceInterval};

/// A range of one part, relative to the start of that part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpan {
    pub part_index: usize,
    pub start: Duration,
    pub end: Duration,
}

/// A silence positioned on the whole-book timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalSilence {
    pub start: Duration,
    pub end: Duration,
}

impl GlobalSilence {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// The parts laid end to end as one continuous timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    /// (global offset, duration) per part, indexed by part index.
    parts: Vec<(Duration, Duration)>,
}

impl Timeline {
    pub fn new(durations: impl IntoIterator<Item = Duration>) -> Self {
        let mut offset = Duration::ZERO;
        let parts = durations
            .into_iter()
            .map(|duration| {
                let entry = (offset, duration);
                offset += duration;
                entry
            })
            .collect();
        Self { parts }
    }

    pub fn from_parts(parts: &[Part]) -> Self {
        Self::new(parts.iter().map(|p| p.duration))
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn total(&self) -> Duration {
        self.parts
            .last()
            .map_or(Duration::ZERO, |(offset, duration)| *offset + *duration)
    }

    /// Whole-part range on the global timeline.
    pub fn part_range(&self, part_index: usize) -> Option<(Duration, Duration)> {
        self.parts
            .get(part_index)
            .map(|(offset, duration)| (*offset, *offset + *duration))
    }

    /// Shift a part-relative interval onto the global timeline.
    pub fn to_global(&self, interval: &SilenceInterval) -> Option<GlobalSilence> {
        let (offset, duration) = *self.parts.get(interval.part_index)?;
        Some(GlobalSilence {
            start: offset + interval.start.min(duration),
            end: offset + interval.end.min(duration),
        })
    }

    /// Map a global range back to the part-relative pieces that cover it.
    pub fn locate(&self, start: Duration, end: Duration) -> Vec<PartSpan> {
        self.parts
            .iter()
            .enumerate()
            .filter_map(|(part_index, &(offset, duration))| {
                let span_start = start.max(offset);
                let span_end = end.min(offset + duration);
                (span_end > span_start).then(|| PartSpan {
                    part_index,
                    start: span_start - offset,
                    end: span_end - offset,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_offsets_accumulate() {
        let timeline = Timeline::new([secs(3600), secs(1800), secs(900)]);
        assert_eq!(timeline.total(), secs(6300));
        assert_eq!(timeline.part_range(0), Some((secs(0), secs(3600))));
        assert_eq!(timeline.part_range(2), Some((secs(5400), secs(6300))));
        assert_eq!(timeline.part_range(3), None);
        assert_eq!(timeline.part_range(1), Some((secs(3600), secs(5400))));
    }

    #[test]
    fn test_to_global() {
        let timeline = Timeline::new([secs(3600), secs(1800)]);
        let interval = SilenceInterval {
            part_index: 1,
            start: secs(100),
            end: secs(104),
        };
        assert_eq!(
            timeline.to_global(&interval),
            Some(GlobalSilence {
                start: secs(3700),
                end: secs(3704)
            })
        );
        let unknown = SilenceInterval {
            part_index: 5,
            ..interval
        };
        assert_eq!(timeline.to_global(&unknown), None);
    }

    #[test]
    fn test_locate_within_one_part() {
        let timeline = Timeline::new([secs(3600), secs(1800)]);
        assert_eq!(
            timeline.locate(secs(3700), secs(4000)),
            vec![PartSpan {
                part_index: 1,
                start: secs(100),
                end: secs(400)
            }]
        );
    }

    #[test]
    fn test_locate_across_parts() {
        let timeline = Timeline::new([secs(3600), secs(1800)]);
        let spans = timeline.locate(secs(2000), secs(5400));
        assert_eq!(
            spans,
            vec![
                PartSpan {
                    part_index: 0,
                    start: secs(2000),
                    end: secs(3600)
                },
                PartSpan {
                    part_index: 1,
                    start: secs(0),
                    end: secs(1800)
                },
            ]
        );
    }

    #[test]
    fn test_empty_timeline() {
        let timeline = Timeline::new([]);
        assert_eq!(timeline.total(), Duration::ZERO);
        assert!(timeline.locate(secs(0), secs(10)).is_empty());
    }
}
