pub mod audio;
pub mod chapters;
pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod har;
pub mod pipeline;

pub use config::{Config, RunConfig};
pub use error::{AudiobookerError, Result};
pub use pipeline::{print_summary, run, run_with_cancel, PipelineResult, PipelineStats};
