//! Model configuration matching BART-style encoder-decoder architectures.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Token ids with a fixed role during generation.
///
/// Defaults follow the BART vocabulary layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub bos: u32,
    pub pad: u32,
    pub eos: u32,
    pub unk: u32,
    pub decoder_start: u32,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            bos: 0,
            pad: 1,
            eos: 2,
            unk: 3,
            decoder_start: 2,
        }
    }
}

impl SpecialTokens {
    /// Whether `id` is a generation-control token that never appears in decoded text.
    pub fn is_control(&self, id: u32) -> bool {
        id == self.bos || id == self.pad || id == self.eos || id == self.unk
    }

    pub fn max_id(&self) -> u32 {
        self.bos
            .max(self.pad)
            .max(self.eos)
            .max(self.unk)
            .max(self.decoder_start)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub d_model: usize,
    pub n_heads: usize,
    pub d_ff: usize,
    pub n_encoder_layers: usize,
    pub n_decoder_layers: usize,
    /// Longest sequence either stack accepts (learned position table size).
    pub max_positions: usize,
    pub layer_norm_eps: f32,
    #[serde(default)]
    pub special_tokens: SpecialTokens,
}

impl ModelConfig {
    /// bart-large-cnn shapes (406M params)
    pub fn bart_large_cnn() -> Self {
        Self {
            // Checkpoint rows; the tokenizer's `<mask>` (50264) has none.
            vocab_size: 50264,
            d_model: 1024,
            n_heads: 16,
            d_ff: 4096,
            n_encoder_layers: 12,
            n_decoder_layers: 12,
            max_positions: 1024,
            layer_norm_eps: 1e-5,
            special_tokens: SpecialTokens::default(),
        }
    }

    /// Tiny test config for quick iteration
    pub fn tiny() -> Self {
        Self {
            vocab_size: 256,
            d_model: 64,
            n_heads: 4,
            d_ff: 128,
            n_encoder_layers: 2,
            n_decoder_layers: 2,
            max_positions: 512,
            layer_norm_eps: 1e-5,
            special_tokens: SpecialTokens::default(),
        }
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.n_heads > 0, "n_heads must be positive");
        ensure!(
            self.d_model % self.n_heads == 0,
            "d_model {} must be divisible by n_heads {}",
            self.d_model,
            self.n_heads
        );
        ensure!(self.d_ff > 0, "d_ff must be positive");
        ensure!(self.max_positions > 0, "max_positions must be positive");
        ensure!(
            (self.special_tokens.max_id() as usize) < self.vocab_size,
            "special token id {} outside vocabulary of {}",
            self.special_tokens.max_id(),
            self.vocab_size
        );
        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::tiny()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        ModelConfig::tiny().validate().expect("tiny");
        ModelConfig::bart_large_cnn().validate().expect("bart");
        assert_eq!(ModelConfig::bart_large_cnn().head_dim(), 64);
    }

    #[test]
    fn rejects_uneven_heads() {
        let config = ModelConfig {
            n_heads: 3,
            ..ModelConfig::tiny()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn special_tokens_default_to_bart_layout() {
        let tokens = SpecialTokens::default();
        assert!(tokens.is_control(2));
        assert!(!tokens.is_control(4));
        assert_eq!(tokens.max_id(), 3);
    }
}
