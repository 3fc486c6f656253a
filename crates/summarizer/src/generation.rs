//! Generation controller: validates length bounds and drives beam search.

use crate::error::{Result, SummarizeError};
use crate::truncation::EncodedInput;
use condense_engine::{BeamParams, GenerationEngine};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use tracing::debug;

/// Range a caller would normally pick `min_length` from.
pub const TYPICAL_MIN_LENGTH: RangeInclusive<usize> = 10..=100;
/// Range a caller would normally pick `max_length` from.
pub const TYPICAL_MAX_LENGTH: RangeInclusive<usize> = 50..=300;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub min_length: usize,
    pub max_length: usize,
    pub max_input_tokens: usize,
    pub num_beams: usize,
    pub early_stopping: bool,
    pub length_penalty: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            min_length: 30,
            max_length: 130,
            max_input_tokens: 384,
            num_beams: 4,
            early_stopping: true,
            length_penalty: 1.0,
        }
    }
}

impl GenerationConfig {
    /// Apply caller-supplied bounds to this policy. Bounds arrive signed so a
    /// negative value is reported as a config error rather than wrapping.
    pub fn with_lengths(self, min_length: i64, max_length: i64) -> Result<Self> {
        let min_length = usize::try_from(min_length).map_err(|_| {
            SummarizeError::invalid_config(format!("min_length {min_length} is negative"))
        })?;
        let max_length = usize::try_from(max_length).map_err(|_| {
            SummarizeError::invalid_config(format!("max_length {max_length} is negative"))
        })?;
        let config = Self {
            min_length,
            max_length,
            ..self
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_length > self.max_length {
            return Err(SummarizeError::invalid_config(format!(
                "min_length {} exceeds max_length {}",
                self.min_length, self.max_length
            )));
        }
        if self.num_beams < 1 {
            return Err(SummarizeError::invalid_config(
                "num_beams must be at least 1",
            ));
        }
        if self.max_input_tokens == 0 {
            return Err(SummarizeError::invalid_config(
                "max_input_tokens must be positive",
            ));
        }
        if !self.length_penalty.is_finite() {
            return Err(SummarizeError::invalid_config(
                "length_penalty must be finite",
            ));
        }
        Ok(())
    }

    pub fn beam_params(&self) -> BeamParams {
        BeamParams {
            num_beams: self.num_beams,
            min_length: self.min_length,
            max_length: self.max_length,
            early_stopping: self.early_stopping,
            length_penalty: self.length_penalty,
        }
    }

    /// Bounds outside the typical ranges, as human-readable warnings.
    pub fn unusual_lengths(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !TYPICAL_MIN_LENGTH.contains(&self.min_length) {
            warnings.push(format!(
                "min_length {} is outside the typical range {}..={}",
                self.min_length,
                TYPICAL_MIN_LENGTH.start(),
                TYPICAL_MIN_LENGTH.end()
            ));
        }
        if !TYPICAL_MAX_LENGTH.contains(&self.max_length) {
            warnings.push(format!(
                "max_length {} is outside the typical range {}..={}",
                self.max_length,
                TYPICAL_MAX_LENGTH.start(),
                TYPICAL_MAX_LENGTH.end()
            ));
        }
        warnings
    }
}

/// Reject a `max_length` the engine could never produce.
pub fn check_engine_limits<E>(engine: &E, config: &GenerationConfig) -> Result<()>
where
    E: GenerationEngine + ?Sized,
{
    match engine.max_output_tokens() {
        Some(limit) if config.max_length > limit => Err(SummarizeError::invalid_config(format!(
            "max_length {} exceeds the engine limit of {limit} tokens",
            config.max_length
        ))),
        _ => Ok(()),
    }
}

/// Run beam search for `encoded` under `config`.
///
/// The config is validated against itself and the engine's limits before the
/// engine is touched, and the returned sequence is checked against
/// `[min_length, max_length]`.
pub fn generate<E>(engine: &E, encoded: &EncodedInput, config: &GenerationConfig) -> Result<Vec<u32>>
where
    E: GenerationEngine + ?Sized,
{
    config.validate()?;
    check_engine_limits(engine, config)?;
    let params = config.beam_params();

    let tokens = engine
        .generate(encoded.ids(), &params)
        .map_err(SummarizeError::GenerationFailed)?;

    if tokens.len() > config.max_length {
        return Err(SummarizeError::GenerationFailed(anyhow::anyhow!(
            "engine produced {} tokens, above max_length {}",
            tokens.len(),
            config.max_length
        )));
    }
    if tokens.len() < config.min_length {
        return Err(SummarizeError::GenerationFailed(anyhow::anyhow!(
            "engine produced {} tokens, below min_length {}",
            tokens.len(),
            config.min_length
        )));
    }

    debug!(
        input_tokens = encoded.len(),
        tokens = tokens.len(),
        "generation within bounds"
    );
    Ok(tokens)
}
