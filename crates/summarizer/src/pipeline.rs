//! End-to-end summarization: normalize, truncate, generate, decode, measure.

use crate::decode::{decode, Summary};
use crate::error::Result;
use crate::generation::{check_engine_limits, generate, GenerationConfig};
use crate::normalize::normalize;
use crate::stats::{compute_stats, SummaryStats};
use crate::truncation::prepare_input;
use condense_engine::GenerationEngine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    pub summary: Summary,
    pub stats: SummaryStats,
    /// Length of the encoded input the engine actually saw.
    pub input_tokens: usize,
}

/// Request-scoped pipeline over a shared engine handle.
pub struct Summarizer<E: GenerationEngine + ?Sized> {
    engine: Arc<E>,
    policy: GenerationConfig,
}

impl<E: GenerationEngine + ?Sized> Clone for Summarizer<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            policy: self.policy,
        }
    }
}

impl<E: GenerationEngine + ?Sized> Summarizer<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self::with_policy(engine, GenerationConfig::default())
    }

    pub fn with_policy(engine: Arc<E>, policy: GenerationConfig) -> Self {
        Self { engine, policy }
    }

    pub fn policy(&self) -> &GenerationConfig {
        &self.policy
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Summarize `raw` with caller-chosen length bounds and the policy's
    /// remaining settings.
    pub fn summarize(&self, raw: &str, min_length: i64, max_length: i64) -> Result<SummaryOutcome> {
        let normalized = normalize(raw)?;
        let config = self.policy.with_lengths(min_length, max_length)?;
        self.run(normalized.text, normalized.word_count, &config)
    }

    /// Summarize `raw` under a fully specified config.
    pub fn summarize_with(&self, raw: &str, config: &GenerationConfig) -> Result<SummaryOutcome> {
        let normalized = normalize(raw)?;
        config.validate()?;
        self.run(normalized.text, normalized.word_count, config)
    }

    fn run(&self, text: &str, word_count: usize, config: &GenerationConfig) -> Result<SummaryOutcome> {
        debug!(words = word_count, "input normalized");
        check_engine_limits(self.engine.as_ref(), config)?;

        let encoded = prepare_input(self.engine.as_ref(), text, config.max_input_tokens)?;
        debug!(tokens = encoded.len(), limit = config.max_input_tokens, "input encoded");

        let tokens = generate(self.engine.as_ref(), &encoded, config)?;
        let summary = decode(self.engine.as_ref(), &tokens)?;
        debug!(tokens = summary.token_count, "summary decoded");

        let stats = compute_stats(word_count, &summary.text)?;
        debug!(ratio = stats.compression_ratio, "stats computed");

        Ok(SummaryOutcome {
            summary,
            stats,
            input_tokens: encoded.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SummarizeError;
    use condense_engine::BeamParams;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One output token per input id, clamped to the requested bounds.
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    impl GenerationEngine for Echo {
        fn encode(&self, text: &str, max_tokens: usize) -> anyhow::Result<Vec<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..text.split_whitespace().count() as u32)
                .take(max_tokens)
                .collect())
        }

        fn generate(&self, input_ids: &[u32], params: &BeamParams) -> anyhow::Result<Vec<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let len = params.min_length.max(input_ids.len().min(params.max_length));
            Ok(vec![1; len])
        }

        fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["word"; ids.len()].join(" "))
        }
    }

    #[test]
    fn produces_summary_and_stats() {
        let summarizer = Summarizer::new(Arc::new(Echo::default()));
        let outcome = summarizer
            .summarize("The quick brown fox jumps over the lazy dog.", 5, 10)
            .unwrap();
        assert_eq!(outcome.input_tokens, 9);
        assert_eq!(outcome.summary.token_count, 9);
        assert_eq!(outcome.stats.original_word_count, 9);
        assert_eq!(outcome.stats.summary_word_count, 9);
        assert_eq!(outcome.stats.compression_ratio, 100.0);
    }

    #[test]
    fn empty_input_skips_the_engine() {
        let engine = Arc::new(Echo::default());
        let summarizer = Summarizer::new(Arc::clone(&engine));
        assert!(matches!(
            summarizer.summarize("   ", 5, 10),
            Err(SummarizeError::EmptyInput)
        ));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invalid_bounds_skip_the_engine() {
        let engine = Arc::new(Echo::default());
        let summarizer = Summarizer::new(Arc::clone(&engine));
        assert!(matches!(
            summarizer.summarize("some real text", 50, 30),
            Err(SummarizeError::InvalidConfig { .. })
        ));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn summarize_with_uses_the_given_policy() {
        let summarizer = Summarizer::new(Arc::new(Echo::default()));
        let config = GenerationConfig {
            min_length: 1,
            max_length: 3,
            max_input_tokens: 2,
            ..GenerationConfig::default()
        };
        let outcome = summarizer.summarize_with("a b c d e", &config).unwrap();
        assert_eq!(outcome.input_tokens, 2);
        assert_eq!(outcome.stats.original_word_count, 5);
        assert_eq!(outcome.stats.compression_ratio, 40.0);
    }
}
