//! Extraction of audio segment URLs from a browser HAR capture.
//!
//! Each distinct media URL is one streamed part. Requests carrying a `Range`
//! header become ordered byte-range segments of that part.

use crate::error::{AudiobookerError, Result};
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Debug, Deserialize)]
pub struct HarLog {
    #[serde(default)]
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
pub struct HarEntry {
    #[serde(rename = "startedDateTime")]
    pub started: DateTime<FixedOffset>,
    #[serde(rename = "_resourceType", default)]
    pub resource_type: Option<String>,
    pub request: HarRequest,
    #[serde(default)]
    pub response: Option<HarResponse>,
}

#[derive(Debug, Deserialize)]
pub struct HarRequest {
    pub url: String,
    #[serde(default)]
    pub headers: Vec<HarHeader>,
}

#[derive(Debug, Deserialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct HarResponse {
    #[serde(default)]
    pub content: Option<HarContent>,
}

#[derive(Debug, Deserialize)]
pub struct HarContent {
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
}

impl HarEntry {
    fn is_media(&self) -> bool {
        match self.resource_type.as_deref() {
            Some(kind) => kind == "media",
            None => self
                .response
                .as_ref()
                .and_then(|r| r.content.as_ref())
                .and_then(|c| c.mime_type.as_deref())
                .is_some_and(|mime| mime.starts_with("audio/")),
        }
    }

    fn range(&self) -> Option<ByteRange> {
        self.request
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("range"))
            .and_then(|h| ByteRange::parse(&h.value))
    }
}

/// An inclusive HTTP byte range. `end == None` means "to the end of the resource".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parse a single-range `Range` header value such as `bytes=0-1023`.
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?;
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        let start: u64 = start.trim().parse().ok()?;
        let end = match end.trim() {
            "" => None,
            e => Some(e.parse::<u64>().ok()?),
        };
        if end.is_some_and(|e| e < start) {
            return None;
        }
        Some(Self { start, end })
    }

    /// A range covering the whole resource.
    pub fn is_whole(&self) -> bool {
        self.start == 0 && self.end.is_none()
    }

    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Expected body length, when bounded.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start + 1)
    }
}

/// One remote audio byte-stream to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub url: String,
    pub part_index: usize,
    pub sequence_index: usize,
    /// `None` fetches the whole resource.
    pub range: Option<ByteRange>,
}

/// Load and parse a HAR file.
pub fn load_har(path: &Path) -> Result<Har> {
    info!("Loading data from the {} HAR file", path.display());
    let contents = std::fs::read_to_string(path).map_err(|e| {
        AudiobookerError::Har(format!("Failed to read {}: {e}", path.display()))
    })?;
    let har: Har = serde_json::from_str(&contents).map_err(|e| {
        AudiobookerError::Har(format!("{} is not a valid HAR file: {e}", path.display()))
    })?;
    debug!("Loaded {} HAR entries", har.log.entries.len());
    Ok(har)
}

/// Collect the ordered segment descriptors for every media request to `media_host`.
pub fn extract_segments(har: &Har, media_host: &str) -> Result<Vec<SegmentDescriptor>> {
    // (url, range) -> newest request time
    let mut latest: HashMap<(&str, Option<ByteRange>), DateTime<FixedOffset>> = HashMap::new();

    for entry in &har.log.entries {
        let url = entry.request.url.as_str();
        if !entry.is_media() {
            debug!("Skipping non-media resource: {}", url);
            continue;
        }
        if !url.contains(media_host) {
            debug!("Skipping URL from another host: {}", url);
            continue;
        }
        let key = (url, entry.range().filter(|r| !r.is_whole()));
        match latest.get(&key) {
            Some(seen) if *seen >= entry.started => {
                debug!("Skipping older request for {}", url);
            }
            _ => {
                latest.insert(key, entry.started);
            }
        }
    }

    if latest.is_empty() {
        return Err(AudiobookerError::Har(format!(
            "No media requests to {media_host} found. Capture the HAR file while the \
             audiobook is playing and skip through every part"
        )));
    }

    struct PartRequests<'a> {
        url: &'a str,
        newest: DateTime<FixedOffset>,
        ranges: Vec<Option<ByteRange>>,
    }

    let mut parts: Vec<PartRequests> = Vec::new();
    for ((url, range), started) in latest {
        match parts.iter_mut().find(|p| p.url == url) {
            Some(part) => {
                part.newest = part.newest.max(started);
                part.ranges.push(range);
            }
            None => parts.push(PartRequests {
                url,
                newest: started,
                ranges: vec![range],
            }),
        }
    }
    parts.sort_by(|a, b| a.newest.cmp(&b.newest).then_with(|| a.url.cmp(b.url)));

    let mut descriptors = Vec::new();
    for (part_index, part) in parts.into_iter().enumerate() {
        let ranges = if part.ranges.iter().any(Option::is_none) {
            vec![None]
        } else {
            covering_ranges(part.ranges.into_iter().flatten().collect())
                .into_iter()
                .map(Some)
                .collect()
        };

        debug!(
            "Part {} -> {} ({} segment(s))",
            part_index,
            part.url,
            ranges.len()
        );

        for (sequence_index, range) in ranges.into_iter().enumerate() {
            descriptors.push(SegmentDescriptor {
                url: part.url.to_string(),
                part_index,
                sequence_index,
                range,
            });
        }
    }

    info!(
        "Located {} segment(s) across {} part(s)",
        descriptors.len(),
        descriptors.last().map_or(0, |d| d.part_index + 1)
    );
    Ok(descriptors)
}

/// Sort ranges by start and drop any range already covered by an earlier one.
fn covering_ranges(mut ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    // Longest first among equal starts; an open end sorts as longest.
    ranges.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| b.end.unwrap_or(u64::MAX).cmp(&a.end.unwrap_or(u64::MAX)))
    });

    let mut kept: Vec<ByteRange> = Vec::new();
    let mut covered_to: Option<u64> = None;
    for range in ranges {
        let end = range.end.unwrap_or(u64::MAX);
        if covered_to.is_some_and(|covered| end <= covered) {
            continue;
        }
        covered_to = Some(covered_to.map_or(end, |covered| covered.max(end)));
        kept.push(range);
    }
    kept
}

/// Load a HAR file and extract its segment descriptors.
pub fn load_segments(path: &Path, media_host: &str) -> Result<Vec<SegmentDescriptor>> {
    let har = load_har(path)?;
    extract_segments(&har, media_host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HOST: &str = "odrmediaclips.cachefly.net";

    fn entry(url: &str, started: &str, range: Option<&str>) -> serde_json::Value {
        let headers = match range {
            Some(r) => json!([{ "name": "Range", "value": r }]),
            None => json!([]),
        };
        json!({
            "startedDateTime": started,
            "_resourceType": "media",
            "request": { "method": "GET", "url": url, "headers": headers },
            "response": { "status": 206, "content": { "mimeType": "audio/mpeg" } }
        })
    }

    fn har(entries: Vec<serde_json::Value>) -> Har {
        serde_json::from_value(json!({ "log": { "version": "1.2", "entries": entries } })).unwrap()
    }

    #[test]
    fn test_byte_range_parse() {
        assert_eq!(
            ByteRange::parse("bytes=0-1023"),
            Some(ByteRange { start: 0, end: Some(1023) })
        );
        assert_eq!(
            ByteRange::parse("bytes=2048-"),
            Some(ByteRange { start: 2048, end: None })
        );
        assert_eq!(ByteRange::parse("bytes=10-5"), None);
        assert_eq!(ByteRange::parse("bytes=0-1,5-9"), None);
        assert_eq!(ByteRange::parse("items=0-1"), None);
        assert_eq!(ByteRange::parse("bytes=0-1023").unwrap().len(), Some(1024));
        assert_eq!(
            ByteRange::parse("bytes=5-").unwrap().header_value(),
            "bytes=5-"
        );
    }

    #[test]
    fn test_parts_ordered_by_newest_timestamp() {
        let har = har(vec![
            entry("https://odrmediaclips.cachefly.net/b/part2", "2024-01-01T10:05:00Z", None),
            entry("https://odrmediaclips.cachefly.net/b/part1", "2024-01-01T10:00:00Z", None),
            entry("https://example.com/cover.jpg", "2024-01-01T09:00:00Z", None),
        ]);
        let segments = extract_segments(&har, HOST).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].url.ends_with("part1"));
        assert_eq!(segments[0].part_index, 0);
        assert!(segments[1].url.ends_with("part2"));
        assert_eq!(segments[1].part_index, 1);
        assert!(segments.iter().all(|s| s.range.is_none()));
    }

    #[test]
    fn test_duplicate_requests_keep_newest() {
        // part1 was replayed after part2, so it sorts last.
        let har = har(vec![
            entry("https://odrmediaclips.cachefly.net/b/part1", "2024-01-01T10:00:00Z", None),
            entry("https://odrmediaclips.cachefly.net/b/part2", "2024-01-01T10:05:00Z", None),
            entry("https://odrmediaclips.cachefly.net/b/part1", "2024-01-01T10:10:00Z", None),
        ]);
        let segments = extract_segments(&har, HOST).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].url.ends_with("part2"));
        assert!(segments[1].url.ends_with("part1"));
    }

    #[test]
    fn test_ranged_requests_become_sequences() {
        let url = "https://odrmediaclips.cachefly.net/b/part1";
        let har = har(vec![
            entry(url, "2024-01-01T10:00:02Z", Some("bytes=1000-1999")),
            entry(url, "2024-01-01T10:00:00Z", Some("bytes=0-999")),
            entry(url, "2024-01-01T10:00:03Z", Some("bytes=200-499")),
            entry(url, "2024-01-01T10:00:04Z", Some("bytes=2000-")),
        ]);
        let segments = extract_segments(&har, HOST).unwrap();
        let ranges: Vec<_> = segments.iter().map(|s| s.range.unwrap()).collect();
        assert_eq!(
            ranges,
            vec![
                ByteRange { start: 0, end: Some(999) },
                ByteRange { start: 1000, end: Some(1999) },
                ByteRange { start: 2000, end: None },
            ]
        );
        let sequence: Vec<_> = segments.iter().map(|s| s.sequence_index).collect();
        assert_eq!(sequence, vec![0, 1, 2]);
    }

    #[test]
    fn test_whole_request_wins_over_ranges() {
        let url = "https://odrmediaclips.cachefly.net/b/part1";
        let har = har(vec![
            entry(url, "2024-01-01T10:00:00Z", Some("bytes=0-999")),
            entry(url, "2024-01-01T10:00:01Z", Some("bytes=0-")),
        ]);
        let segments = extract_segments(&har, HOST).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].range, None);
    }

    #[test]
    fn test_no_media_entries_is_an_error() {
        let har = har(vec![entry("https://example.com/a.mp3", "2024-01-01T10:00:00Z", None)]);
        let err = extract_segments(&har, HOST).unwrap_err();
        assert!(matches!(err, AudiobookerError::Har(_)));
    }

    #[test]
    fn test_mime_type_fallback_without_resource_type() {
        let har: Har = serde_json::from_value(json!({ "log": { "entries": [{
            "startedDateTime": "2024-01-01T10:00:00.123+00:00",
            "request": { "url": "https://odrmediaclips.cachefly.net/b/part1" },
            "response": { "content": { "mimeType": "audio/mpeg" } }
        }]}}))
        .unwrap();
        assert_eq!(extract_segments(&har, HOST).unwrap().len(), 1);
    }
}
