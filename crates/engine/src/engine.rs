//! The generation engine contract and the bundled seq2seq implementation.

use crate::beam::{beam_search, BeamParams, StepDecoder};
use crate::config::SpecialTokens;
use crate::kv_cache::KVCache;
use crate::model::{EncoderMemory, Seq2SeqModel};
use crate::tokenizer::Tokenizer;
use anyhow::{ensure, Result};
use ndarray::Array1;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Immutable handle the summarization pipeline drives.
///
/// Implementations must be safe to share across threads and must not mutate
/// themselves while serving a call.
pub trait GenerationEngine: Send + Sync {
    /// Tokenize `text`, keeping at most the leading `max_tokens` ids.
    fn encode(&self, text: &str, max_tokens: usize) -> Result<Vec<u32>>;

    /// Beam-search a token sequence conditioned on `input_ids`.
    fn generate(&self, input_ids: &[u32], params: &BeamParams) -> Result<Vec<u32>>;

    /// Map ids back to text with control tokens removed.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Longest encoded input the engine accepts, if bounded.
    fn max_input_tokens(&self) -> Option<usize> {
        None
    }

    /// Longest sequence the engine can generate, if bounded.
    fn max_output_tokens(&self) -> Option<usize> {
        None
    }
}

impl<E: GenerationEngine + ?Sized> GenerationEngine for Arc<E> {
    fn encode(&self, text: &str, max_tokens: usize) -> Result<Vec<u32>> {
        (**self).encode(text, max_tokens)
    }

    fn generate(&self, input_ids: &[u32], params: &BeamParams) -> Result<Vec<u32>> {
        (**self).generate(input_ids, params)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        (**self).decode(ids)
    }

    fn max_input_tokens(&self) -> Option<usize> {
        (**self).max_input_tokens()
    }

    fn max_output_tokens(&self) -> Option<usize> {
        (**self).max_output_tokens()
    }
}

#[derive(Debug)]
pub struct GenerationMetrics {
    pub encode_ms: f64,
    pub decode_ms: f64,
    pub tokens_generated: usize,
    pub tokens_per_sec: f64,
    pub beam_steps: usize,
    pub finished_hypotheses: usize,
    pub kv_cache_bytes_per_token: usize,
}

pub struct Seq2SeqEngine {
    model: Seq2SeqModel,
    tokenizer: Tokenizer,
    special: SpecialTokens,
    /// Per model id: whether the tokenizer can decode it.
    decodable: Vec<bool>,
}

impl Seq2SeqEngine {
    /// Pair a model with a tokenizer. Tokenizer ids beyond the model
    /// vocabulary are encoded as `<unk>`; model ids the tokenizer cannot
    /// decode are never generated.
    pub fn new(model: Seq2SeqModel, tokenizer: Tokenizer) -> Result<Self> {
        let vocab_size = model.config().vocab_size;
        let special = match tokenizer.special_tokens() {
            Some(special) => special,
            None => model.config().special_tokens,
        };
        ensure!(
            (special.max_id() as usize) < vocab_size,
            "special token id {} outside model vocabulary",
            special.max_id()
        );

        if tokenizer.vocab_size() > vocab_size {
            warn!(
                tokenizer = tokenizer.vocab_size(),
                model = vocab_size,
                "tokenizer ids beyond the model vocabulary will encode as <unk>"
            );
        }

        let decodable: Vec<bool> = (0..vocab_size as u32)
            .map(|id| tokenizer.contains_id(id))
            .collect();
        ensure!(
            decodable
                .iter()
                .enumerate()
                .any(|(id, &ok)| ok && !special.is_control(id as u32)),
            "tokenizer shares no ordinary tokens with the model vocabulary"
        );

        Ok(Self {
            model,
            tokenizer,
            special,
            decodable,
        })
    }

    pub fn model(&self) -> &Seq2SeqModel {
        &self.model
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }

    /// Generate tokens with beam search.
    ///
    /// Returns (generated_tokens, metrics)
    pub fn generate_with_metrics(
        &self,
        input_ids: &[u32],
        params: &BeamParams,
    ) -> Result<(Vec<u32>, GenerationMetrics)> {
        // Encoder (prefill) phase
        let encode_start = Instant::now();
        let memory = self.model.encode(input_ids)?;
        let encode_ms = encode_start.elapsed().as_secs_f64() * 1000.0;

        // Decode phase
        let decode_start = Instant::now();
        let decoder = ModelDecoder {
            model: &self.model,
            memory: &memory,
        };
        let output = beam_search(&decoder, params, &self.special, &self.decodable)?;
        let decode_ms = decode_start.elapsed().as_secs_f64() * 1000.0;

        let tokens_per_sec = if decode_ms > 0.0 {
            (output.tokens.len() as f64 / decode_ms) * 1000.0
        } else {
            0.0
        };

        let metrics = GenerationMetrics {
            encode_ms,
            decode_ms,
            tokens_generated: output.tokens.len(),
            tokens_per_sec,
            beam_steps: output.steps,
            finished_hypotheses: output.finished_hypotheses,
            kv_cache_bytes_per_token: self.model.new_cache().bytes_per_token(),
        };

        Ok((output.tokens, metrics))
    }
}

impl GenerationEngine for Seq2SeqEngine {
    fn encode(&self, text: &str, max_tokens: usize) -> Result<Vec<u32>> {
        let vocab_size = self.model.config().vocab_size;
        let mut ids = self.tokenizer.encode(text, max_tokens)?;
        for id in ids.iter_mut().filter(|id| **id as usize >= vocab_size) {
            *id = self.special.unk;
        }
        debug!(tokens = ids.len(), max_tokens, "text encoded");
        Ok(ids)
    }

    fn generate(&self, input_ids: &[u32], params: &BeamParams) -> Result<Vec<u32>> {
        let (tokens, metrics) = self.generate_with_metrics(input_ids, params)?;
        info!(
            input_tokens = input_ids.len(),
            tokens = metrics.tokens_generated,
            num_beams = params.num_beams,
            encode_ms = metrics.encode_ms,
            decode_ms = metrics.decode_ms,
            tokens_per_sec = metrics.tokens_per_sec,
            beam_steps = metrics.beam_steps,
            finished = metrics.finished_hypotheses,
            "generation completed"
        );
        Ok(tokens)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer.decode(ids)
    }

    fn max_input_tokens(&self) -> Option<usize> {
        Some(self.model.config().max_positions)
    }

    /// One decoder position per fed token; the last generated token is never fed.
    fn max_output_tokens(&self) -> Option<usize> {
        Some(self.model.config().max_positions)
    }
}

struct ModelDecoder<'a> {
    model: &'a Seq2SeqModel,
    memory: &'a EncoderMemory,
}

impl StepDecoder for ModelDecoder<'_> {
    type State = KVCache;

    fn initial_state(&self) -> Result<KVCache> {
        Ok(self.model.new_cache())
    }

    fn step(&self, state: &mut KVCache, token: u32) -> Result<Array1<f32>> {
        self.model.decode_step(self.memory, state, token)
    }
}
