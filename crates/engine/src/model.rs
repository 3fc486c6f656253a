//! Encoder-decoder model: embeddings, encoder stack, decoder stack, LM head.
//!
//! The model is immutable once built. Per-request state (encoder memory and
//! per-beam KV-caches) is owned by the caller, so one model can serve
//! concurrent requests through a shared reference.

use crate::config::ModelConfig;
use crate::device::ComputeDevice;
use crate::kv_cache::KVCache;
use crate::layers::{attention_block, feed_forward, layer_norm};
use crate::weights::ModelWeights;
use anyhow::{ensure, Result};
use ndarray::{s, Array1, Array2, Axis};

pub struct Seq2SeqModel {
    config: ModelConfig,
    weights: ModelWeights,
    device: ComputeDevice,
}

/// Encoder output plus the cross-attention keys/values of every decoder layer.
pub struct EncoderMemory {
    pub hidden: Array2<f32>,
    cross_keys: Vec<Array2<f32>>,
    cross_values: Vec<Array2<f32>>,
}

impl EncoderMemory {
    pub fn len(&self) -> usize {
        self.hidden.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.hidden.nrows() == 0
    }
}

impl Seq2SeqModel {
    pub fn new(config: ModelConfig, weights: ModelWeights, device: ComputeDevice) -> Result<Self> {
        config.validate()?;
        weights.validate(&config)?;
        Ok(Self {
            config,
            weights,
            device,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    /// Run the encoder over the whole input and precompute cross-attention K/V.
    pub fn encode(&self, input_ids: &[u32]) -> Result<EncoderMemory> {
        ensure!(!input_ids.is_empty(), "encoder input is empty");
        ensure!(
            input_ids.len() <= self.config.max_positions,
            "encoder input of {} tokens exceeds {} positions",
            input_ids.len(),
            self.config.max_positions
        );

        let mut hidden = self.embed(input_ids, &self.weights.encoder_positions, 0)?;
        let eps = self.config.layer_norm_eps;

        for layer in &self.weights.encoder_layers {
            let normed = layer_norm(hidden.view(), &layer.ln1, eps)?;
            let k = self.device.matmul(normed.view(), layer.self_attn.k_proj.view())?;
            let v = self.device.matmul(normed.view(), layer.self_attn.v_proj.view())?;
            let attn = attention_block(
                self.device,
                normed.view(),
                k.view(),
                v.view(),
                &layer.self_attn,
                self.config.n_heads,
            )?;
            hidden += &attn;

            let normed = layer_norm(hidden.view(), &layer.ln2, eps)?;
            hidden += &feed_forward(self.device, normed.view(), &layer.mlp_up, &layer.mlp_down)?;
        }

        let hidden = layer_norm(hidden.view(), &self.weights.encoder_final_ln, eps)?;

        let mut cross_keys = Vec::with_capacity(self.weights.decoder_layers.len());
        let mut cross_values = Vec::with_capacity(self.weights.decoder_layers.len());
        for layer in &self.weights.decoder_layers {
            cross_keys.push(self.device.matmul(hidden.view(), layer.cross_attn.k_proj.view())?);
            cross_values.push(self.device.matmul(hidden.view(), layer.cross_attn.v_proj.view())?);
        }

        Ok(EncoderMemory {
            hidden,
            cross_keys,
            cross_values,
        })
    }

    /// Empty self-attention cache sized for this model.
    pub fn new_cache(&self) -> KVCache {
        KVCache::new(
            self.config.n_decoder_layers,
            self.config.max_positions,
            self.config.d_model,
        )
    }

    /// Feed one decoder token and return next-token logits over the vocabulary.
    pub fn decode_step(
        &self,
        memory: &EncoderMemory,
        cache: &mut KVCache,
        token: u32,
    ) -> Result<Array1<f32>> {
        let position = cache.len();
        let mut hidden = self.embed(&[token], &self.weights.decoder_positions, position)?;
        let eps = self.config.layer_norm_eps;

        for (layer_idx, layer) in self.weights.decoder_layers.iter().enumerate() {
            let normed = layer_norm(hidden.view(), &layer.ln1, eps)?;
            let k_new = self.device.matmul(normed.view(), layer.self_attn.k_proj.view())?;
            let v_new = self.device.matmul(normed.view(), layer.self_attn.v_proj.view())?;
            cache.append(layer_idx, k_new, v_new)?;
            let (k_full, v_full) = cache.get(layer_idx);
            hidden += &attention_block(
                self.device,
                normed.view(),
                k_full,
                v_full,
                &layer.self_attn,
                self.config.n_heads,
            )?;

            let normed = layer_norm(hidden.view(), &layer.ln2, eps)?;
            hidden += &attention_block(
                self.device,
                normed.view(),
                memory.cross_keys[layer_idx].view(),
                memory.cross_values[layer_idx].view(),
                &layer.cross_attn,
                self.config.n_heads,
            )?;

            let normed = layer_norm(hidden.view(), &layer.ln3, eps)?;
            hidden += &feed_forward(self.device, normed.view(), &layer.mlp_up, &layer.mlp_down)?;
        }

        let normed = layer_norm(hidden.view(), &self.weights.decoder_final_ln, eps)?;
        let logits = self
            .device
            .matmul_full(normed.view(), self.weights.lm_head.view())?;
        Ok(logits.index_axis(Axis(0), 0).to_owned())
    }

    /// Token + learned position embeddings: (len, d_model)
    fn embed(&self, ids: &[u32], positions: &Array2<f32>, offset: usize) -> Result<Array2<f32>> {
        ensure!(
            offset + ids.len() <= positions.nrows(),
            "position {} exceeds {} positions",
            offset + ids.len(),
            positions.nrows()
        );

        let mut hidden = positions
            .slice(s![offset..offset + ids.len(), ..])
            .to_owned();
        for (i, &id) in ids.iter().enumerate() {
            ensure!(
                (id as usize) < self.config.vocab_size,
                "token id {} outside vocabulary of {}",
                id,
                self.config.vocab_size
            );
            let mut row = hidden.row_mut(i);
            row += &self.weights.token_embeddings.row(id as usize);
        }
        Ok(hidden)
    }
}
