use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{AudiobookerError, Result};
use crate::fetch::FetchedSegment;

use super::{MediaTool, Part};

/// Concatenates fetched segments into one file per part.
#[derive(Debug, Clone)]
pub struct PartAssembler {
    output_dir: PathBuf,
    name: String,
}

impl PartAssembler {
    pub fn new(output_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            name: name.into(),
        }
    }

    pub fn part_path(&self, part_index: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_part{:02}.mp3", self.name, part_index + 1))
    }

    /// Join one part's segments byte for byte, in sequence order.
    ///
    /// Returns the assembled file and its length. Segments must be sorted by
    /// sequence index; a missing index or byte gap is an [`AudiobookerError::Assembly`].
    pub async fn assemble_part(&self, part_index: usize, segments: &[&FetchedSegment]) -> Result<(PathBuf, u64)> {
        for (expected, segment) in segments.iter().enumerate() {
            if segment.descriptor.sequence_index != expected {
                return Err(AudiobookerError::Assembly(format!(
                    "Part {} is missing segment {} (found segment {} instead). \
                     Regenerate the HAR file and play through the whole part",
                    part_index + 1,
                    expected,
                    segment.descriptor.sequence_index
                )));
            }
        }

        let plan = plan_byte_copy(part_index, segments)?;

        if let [(segment, 0)] = plan.as_slice() {
            debug!(
                "Part {} is a single segment, using {} in place",
                part_index + 1,
                segment.path.display()
            );
            return Ok((segment.path.clone(), segment.bytes));
        }

        let output = self.part_path(part_index);
        let mut out = fs::File::create(&output).await?;
        let mut written = 0u64;

        for (segment, skip) in plan {
            let mut input = fs::File::open(&segment.path).await?;
            if skip > 0 {
                input.seek(SeekFrom::Start(skip)).await?;
            }
            written += tokio::io::copy(&mut input, &mut out).await?;
        }
        out.flush().await?;

        debug!(
            "Assembled part {} into {} ({} bytes)",
            part_index + 1,
            output.display(),
            written
        );
        Ok((output, written))
    }
}

/// Work out how many leading bytes of each segment overlap what came before.
fn plan_byte_copy<'a>(
    part_index: usize,
    segments: &[&'a FetchedSegment],
) -> Result<Vec<(&'a FetchedSegment, u64)>> {
    let mut plan = Vec::with_capacity(segments.len());
    // Next byte offset the part still needs; None once a segment ran to the end.
    let mut next: Option<u64> = Some(0);

    for &segment in segments {
        let Some(expected) = next else {
            debug!(
                "Skipping segment {} of part {}: earlier segment ran to end of file",
                segment.descriptor.sequence_index,
                part_index + 1
            );
            continue;
        };

        let range = segment.descriptor.range;
        let start = range.map_or(0, |r| r.start);

        if start > expected {
            return Err(AudiobookerError::Assembly(format!(
                "Part {} has a gap: bytes {}-{} were never captured. \
                 Regenerate the HAR file and play through the whole part",
                part_index + 1,
                expected,
                start - 1
            )));
        }

        let skip = expected - start;
        if skip >= segment.bytes {
            continue;
        }
        plan.push((segment, skip));

        next = match range {
            Some(r) if r.end.is_some() => Some(start + segment.bytes),
            _ => None,
        };
    }

    Ok(plan)
}

/// Assemble every part and probe its duration.
///
/// Parts come back ordered by index; the part indices must form 0..n.
pub async fn assemble_parts(
    assembler: &PartAssembler,
    segments: &[FetchedSegment],
    tool: &dyn MediaTool,
) -> Result<Vec<Part>> {
    let mut by_part: BTreeMap<usize, Vec<&FetchedSegment>> = BTreeMap::new();
    for segment in segments {
        by_part
            .entry(segment.descriptor.part_index)
            .or_default()
            .push(segment);
    }

    fs::create_dir_all(&assembler.output_dir).await?;

    let mut parts = Vec::with_capacity(by_part.len());
    for (expected, (part_index, mut part_segments)) in by_part.into_iter().enumerate() {
        if part_index != expected {
            return Err(AudiobookerError::Assembly(format!(
                "Part {} has no downloaded segments",
                expected + 1
            )));
        }

        part_segments.sort_by_key(|s| s.descriptor.sequence_index);
        let (path, bytes) = assembler.assemble_part(part_index, &part_segments).await?;
        let duration = tool.probe_duration(&path).await?;

        info!(
            "Part {}: {} ({:.1}s)",
            part_index + 1,
            path.display(),
            duration.as_secs_f64()
        );

        parts.push(Part {
            index: part_index,
            path,
            duration,
            bytes,
        });
    }

    Ok(parts)
}
