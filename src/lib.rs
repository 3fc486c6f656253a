//! condense: abstractive summarization with a bundled encoder-decoder engine.

pub use condense_engine as engine;
pub use condense_summarizer as summarizer;

pub use condense_engine::{BeamParams, DevicePreference, GenerationEngine, Seq2SeqEngine};
pub use condense_summarizer::{
    GenerationConfig, HostConfig, ModelHost, SummarizeError, Summarizer, SummaryOutcome,
    SummaryStats,
};
