//! Summarization pipeline over a generation engine.

#[cfg(feature = "cli")]
pub mod cli;
pub mod decode;
pub mod error;
pub mod generation;
pub mod host;
pub mod normalize;
pub mod pipeline;
pub mod stats;
pub mod truncation;

pub use decode::{decode, Summary};
pub use error::{Result, SummarizeError};
pub use generation::{
    check_engine_limits, generate, GenerationConfig, TYPICAL_MAX_LENGTH, TYPICAL_MIN_LENGTH,
};
pub use host::{HostConfig, ModelHost};
pub use normalize::{decode_upload, normalize, word_count, NormalizedText};
pub use pipeline::{Summarizer, SummaryOutcome};
pub use stats::{compute_stats, SummaryStats};
pub use truncation::{prepare_input, EncodedInput};
