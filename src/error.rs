use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudiobookerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HAR capture error: {0}")]
    Har(String),

    #[error("Download failed: {0}")]
    Fetch(String),

    #[error("Part assembly failed: {0}")]
    Assembly(String),

    #[error(
        "Chapter template needs {required} structural segment(s) but only {raw_segments} \
         segment(s) were found ({boundaries} silence boundaries detected). \
         Adjust the silence thresholds or check the --has-* flags"
    )]
    InsufficientSegments {
        boundaries: usize,
        raw_segments: usize,
        required: usize,
    },

    #[error("Export of track {ordinal} ({label}) failed: {reason}")]
    Export {
        ordinal: usize,
        label: String,
        reason: String,
    },

    #[error("Media tool failed: {0}")]
    MediaTool(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AudiobookerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_error_names_the_track() {
        let err = AudiobookerError::Export {
            ordinal: 3,
            label: "Chapter 2".to_string(),
            reason: "ffmpeg exited with status 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Export of track 3 (Chapter 2) failed: ffmpeg exited with status 1"
        );
    }

    #[test]
    fn test_insufficient_segments_message_reports_counts() {
        let err = AudiobookerError::InsufficientSegments {
            boundaries: 0,
            raw_segments: 1,
            required: 2,
        };
        let message = err.to_string();
        assert!(message.contains("needs 2"));
        assert!(message.contains("only 1"));
        assert!(message.contains("0 silence boundaries"));
    }
}
