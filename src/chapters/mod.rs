//! Chapter segmentation.
//!
//! Turns the silences detected in every part into an ordered list of tracks.
//! Silences are placed on one book-wide timeline, the long ones become
//! chapter boundaries, and the resulting raw segments are labeled from both
//! ends according to the [`ChapterTemplate`]. Everything here is pure and
//! deterministic; no files or processes are touched.

pub mod timeline;

pub use timeline::{GlobalSilence, PartSpan, Timeline};

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info};

use crate::audio::SilenceInterval;
use crate::config::{ChapterTemplate, RunConfig, SilenceSettings, TrimBias};
use crate::error::{AudiobookerError, Result};

/// Silences closer than this to each other are one silence, and a silence this
/// close to either end of the book is an edge silence.
pub const EDGE_TOLERANCE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentLabel {
    Introduction,
    Prologue,
    Chapter(usize),
    Epilogue,
    Conclusion,
    /// Whole streamed part, used when chapter detection is off.
    Part(usize),
}

impl std::fmt::Display for SegmentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentLabel::Introduction => write!(f, "Introduction"),
            SegmentLabel::Prologue => write!(f, "Prologue"),
            SegmentLabel::Chapter(n) => write!(f, "Chapter {n}"),
            SegmentLabel::Epilogue => write!(f, "Epilogue"),
            SegmentLabel::Conclusion => write!(f, "Conclusion"),
            SegmentLabel::Part(n) => write!(f, "Part {n}"),
        }
    }
}

/// One planned output track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSegment {
    /// 1-based track number across the whole book.
    pub ordinal: usize,
    pub label: SegmentLabel,
    /// Range on the global timeline.
    pub start: Duration,
    pub end: Duration,
    /// The same range, split into part-relative pieces.
    pub spans: Vec<PartSpan>,
}

impl OutputSegment {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    /// Part the track starts in.
    pub fn part_index(&self) -> usize {
        self.spans.first().map_or(0, |s| s.part_index)
    }
}

/// A raw segment before labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: Duration,
    end: Duration,
}

/// Plans chapter tracks from detected silences.
#[derive(Debug, Clone)]
pub struct ChapterPlanner {
    template: ChapterTemplate,
    silence: SilenceSettings,
    no_chapters: bool,
}

impl ChapterPlanner {
    pub fn new(template: ChapterTemplate, silence: SilenceSettings, no_chapters: bool) -> Self {
        Self {
            template,
            silence,
            no_chapters,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.template, config.silence.clone(), config.no_chapters)
    }

    /// Produce the ordered tracks for the book.
    ///
    /// `silences` are part-relative; any order is accepted. Fails with
    /// [`AudiobookerError::InsufficientSegments`] when the template asks for more
    /// structural sections than there are segments.
    pub fn plan(&self, timeline: &Timeline, silences: &[SilenceInterval]) -> Result<Vec<OutputSegment>> {
        if timeline.total().is_zero() {
            return Err(AudiobookerError::Assembly(
                "The assembled audiobook has no audio".to_string(),
            ));
        }

        if self.no_chapters {
            return Ok(self.plan_parts(timeline));
        }

        let merged = merge_global(timeline, silences);
        let candidates: Vec<GlobalSilence> = merged
            .into_iter()
            .filter(|s| s.duration() >= self.silence.min_duration)
            .collect();

        let raw = self.split(timeline.total(), &candidates);
        let boundaries = raw.len() - 1;
        info!(
            "{} candidate silence(s), {} boundary(ies), {} raw segment(s)",
            candidates.len(),
            boundaries,
            raw.len()
        );

        let labeled = self.label(raw, boundaries)?;

        let segments: Vec<OutputSegment> = labeled
            .into_iter()
            .enumerate()
            .map(|(i, (label, span))| OutputSegment {
                ordinal: i + 1,
                label,
                start: span.start,
                end: span.end,
                spans: timeline.locate(span.start, span.end),
            })
            .collect();

        for segment in &segments {
            debug!(
                "Track {:>3}: {:<14} {} - {}",
                segment.ordinal,
                segment.label.to_string(),
                format_timestamp(segment.start),
                format_timestamp(segment.end)
            );
        }

        Ok(segments)
    }

    fn plan_parts(&self, timeline: &Timeline) -> Vec<OutputSegment> {
        (0..timeline.part_count())
            .filter_map(|index| {
                let (start, end) = timeline.part_range(index)?;
                Some(OutputSegment {
                    ordinal: index + 1,
                    label: SegmentLabel::Part(index + 1),
                    start,
                    end,
                    spans: timeline.locate(start, end),
                })
            })
            .collect()
    }

    /// Cut the timeline at each interior candidate, trimming long silences.
    fn split(&self, total: Duration, candidates: &[GlobalSilence]) -> Vec<Span> {
        let max = self.silence.max_silence;
        let mut content_start = Duration::ZERO;
        let mut content_end = total;
        let mut cuts: Vec<(Duration, Duration)> = Vec::new();

        for silence in candidates {
            let keep = silence.duration().min(max);

            if silence.start <= EDGE_TOLERANCE {
                if self.silence.trim_edges {
                    content_start = silence.end - keep;
                }
                continue;
            }
            if silence.end + EDGE_TOLERANCE >= total {
                if self.silence.trim_edges {
                    content_end = silence.start + keep;
                }
                continue;
            }

            let cut = match self.silence.trim_bias {
                TrimBias::Even => (silence.start + keep / 2, silence.end - (keep - keep / 2)),
                TrimBias::Trailing => (silence.start + keep, silence.end),
            };
            cuts.push(cut);
        }

        let mut spans = Vec::with_capacity(cuts.len() + 1);
        let mut start = content_start;
        for (end, next_start) in cuts {
            spans.push(Span { start, end });
            start = next_start;
        }
        spans.push(Span {
            start,
            end: content_end,
        });
        spans
    }

    /// Consume structural sections from both ends, then number the body.
    fn label(&self, raw: Vec<Span>, boundaries: usize) -> Result<Vec<(SegmentLabel, Span)>> {
        let required = self.template.enabled_count();
        if raw.len() < required {
            return Err(AudiobookerError::InsufficientSegments {
                boundaries,
                raw_segments: raw.len(),
                required,
            });
        }

        let mut queue: VecDeque<Span> = raw.into();
        let mut front = Vec::new();
        let mut back = Vec::new();

        // Front, in timeline order.
        for (enabled, label) in [
            (self.template.has_introduction, SegmentLabel::Introduction),
            (self.template.has_prologue, SegmentLabel::Prologue),
        ] {
            if enabled {
                if let Some(span) = queue.pop_front() {
                    front.push((label, span));
                }
            }
        }

        // Back, in reverse timeline order.
        for (enabled, label) in [
            (self.template.has_conclusion, SegmentLabel::Conclusion),
            (self.template.has_epilogue, SegmentLabel::Epilogue),
        ] {
            if enabled {
                if let Some(span) = queue.pop_back() {
                    back.push((label, span));
                }
            }
        }
        back.reverse();

        let body = queue
            .into_iter()
            .enumerate()
            .map(|(i, span)| (SegmentLabel::Chapter(i + 1), span));

        Ok(front.into_iter().chain(body).chain(back).collect())
    }
}

/// Globalize, sort, and merge silences that touch across part boundaries.
fn merge_global(timeline: &Timeline, silences: &[SilenceInterval]) -> Vec<GlobalSilence> {
    let mut global: Vec<GlobalSilence> = silences
        .iter()
        .filter_map(|s| {
            let mapped = timeline.to_global(s);
            if mapped.is_none() {
                debug!("Ignoring silence for unknown part {}", s.part_index);
            }
            mapped
        })
        .filter(|s| s.end > s.start)
        .collect();
    global.sort_by_key(|s| s.start);

    let mut merged: Vec<GlobalSilence> = Vec::with_capacity(global.len());
    for silence in global {
        match merged.last_mut() {
            Some(last) if silence.start <= last.end + EDGE_TOLERANCE => {
                last.end = last.end.max(silence.end);
            }
            _ => merged.push(silence),
        }
    }
    merged
}

/// `HH:MM:SS.mmm`
pub fn format_timestamp(at: Duration) -> String {
    let total_ms = at.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}
