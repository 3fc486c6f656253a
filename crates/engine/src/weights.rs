//! Weight structures and safetensors loader.

use crate::config::ModelConfig;
use anyhow::{ensure, Context, Result};
use ndarray::{Array1, Array2};
use safetensors::{Dtype, SafeTensors};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct AttentionWeights {
    pub q_proj: Array2<f32>,
    pub k_proj: Array2<f32>,
    pub v_proj: Array2<f32>,
    pub out_proj: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct LayerNormWeights {
    pub weight: Array1<f32>,
    pub bias: Array1<f32>,
}

#[derive(Debug, Clone)]
pub struct EncoderLayerWeights {
    pub self_attn: AttentionWeights,
    pub ln1: LayerNormWeights,
    pub mlp_up: Array2<f32>,
    pub mlp_down: Array2<f32>,
    pub ln2: LayerNormWeights,
}

#[derive(Debug, Clone)]
pub struct DecoderLayerWeights {
    pub self_attn: AttentionWeights,
    pub ln1: LayerNormWeights,
    pub cross_attn: AttentionWeights,
    pub ln2: LayerNormWeights,
    pub mlp_up: Array2<f32>,
    pub mlp_down: Array2<f32>,
    pub ln3: LayerNormWeights,
}

#[derive(Debug, Clone)]
pub struct ModelWeights {
    pub token_embeddings: Array2<f32>, // (vocab_size, d_model), shared by both stacks
    pub encoder_positions: Array2<f32>, // (max_positions, d_model)
    pub decoder_positions: Array2<f32>, // (max_positions, d_model)
    pub encoder_layers: Vec<EncoderLayerWeights>,
    pub decoder_layers: Vec<DecoderLayerWeights>,
    pub encoder_final_ln: LayerNormWeights,
    pub decoder_final_ln: LayerNormWeights,
    pub lm_head: Array2<f32>, // (d_model, vocab_size)
}

impl ModelWeights {
    /// Load weights from safetensors format. Layer counts and shapes come from `config`.
    pub fn load_safetensors(path: impl AsRef<Path>, config: &ModelConfig) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .with_context(|| format!("failed to read safetensors file {}", path.display()))?;
        let tensors = SafeTensors::deserialize(&data).context("failed to parse safetensors")?;
        let loader = Loader {
            tensors: &tensors,
            config,
        };

        let d = config.d_model;
        let encoder_layers = (0..config.n_encoder_layers)
            .map(|i| {
                let prefix = format!("encoder.layers.{i}");
                Ok(EncoderLayerWeights {
                    self_attn: loader.attention(&prefix)?,
                    ln1: loader.norm(&format!("{prefix}.ln1"))?,
                    mlp_up: loader.matrix(&format!("{prefix}.mlp_up"), (d, config.d_ff))?,
                    mlp_down: loader.matrix(&format!("{prefix}.mlp_down"), (config.d_ff, d))?,
                    ln2: loader.norm(&format!("{prefix}.ln2"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let decoder_layers = (0..config.n_decoder_layers)
            .map(|i| {
                let prefix = format!("decoder.layers.{i}");
                Ok(DecoderLayerWeights {
                    self_attn: loader.attention(&format!("{prefix}.self"))?,
                    ln1: loader.norm(&format!("{prefix}.ln1"))?,
                    cross_attn: loader.attention(&format!("{prefix}.cross"))?,
                    ln2: loader.norm(&format!("{prefix}.ln2"))?,
                    mlp_up: loader.matrix(&format!("{prefix}.mlp_up"), (d, config.d_ff))?,
                    mlp_down: loader.matrix(&format!("{prefix}.mlp_down"), (config.d_ff, d))?,
                    ln3: loader.norm(&format!("{prefix}.ln3"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            token_embeddings: loader.matrix("shared.embed", (config.vocab_size, d))?,
            encoder_positions: loader.matrix("encoder.pos", (config.max_positions, d))?,
            decoder_positions: loader.matrix("decoder.pos", (config.max_positions, d))?,
            encoder_layers,
            decoder_layers,
            encoder_final_ln: loader.norm("encoder.final_ln")?,
            decoder_final_ln: loader.norm("decoder.final_ln")?,
            lm_head: loader.matrix("lm_head", (d, config.vocab_size))?,
        })
    }

    /// Seeded random weights for demos and tests (not for real summaries).
    pub fn random(config: &ModelConfig, seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut random_array = |shape: (usize, usize)| {
            Array2::from_shape_simple_fn(shape, || (rng.f32() - 0.5) * 0.2)
        };
        let d = config.d_model;

        let attention = |random_array: &mut dyn FnMut((usize, usize)) -> Array2<f32>| {
            AttentionWeights {
                q_proj: random_array((d, d)),
                k_proj: random_array((d, d)),
                v_proj: random_array((d, d)),
                out_proj: random_array((d, d)),
            }
        };

        let encoder_layers = (0..config.n_encoder_layers)
            .map(|_| EncoderLayerWeights {
                self_attn: attention(&mut random_array),
                ln1: LayerNormWeights::identity(d),
                mlp_up: random_array((d, config.d_ff)),
                mlp_down: random_array((config.d_ff, d)),
                ln2: LayerNormWeights::identity(d),
            })
            .collect();

        let decoder_layers = (0..config.n_decoder_layers)
            .map(|_| DecoderLayerWeights {
                self_attn: attention(&mut random_array),
                ln1: LayerNormWeights::identity(d),
                cross_attn: attention(&mut random_array),
                ln2: LayerNormWeights::identity(d),
                mlp_up: random_array((d, config.d_ff)),
                mlp_down: random_array((config.d_ff, d)),
                ln3: LayerNormWeights::identity(d),
            })
            .collect();

        Self {
            token_embeddings: random_array((config.vocab_size, d)),
            encoder_positions: random_array((config.max_positions, d)),
            decoder_positions: random_array((config.max_positions, d)),
            encoder_layers,
            decoder_layers,
            encoder_final_ln: LayerNormWeights::identity(d),
            decoder_final_ln: LayerNormWeights::identity(d),
            lm_head: random_array((d, config.vocab_size)),
        }
    }

    /// Check embedding, head and per-layer projection shapes against `config`.
    pub fn validate(&self, config: &ModelConfig) -> Result<()> {
        let d = config.d_model;
        expect_dim("shared.embed", self.token_embeddings.dim(), (config.vocab_size, d))?;
        expect_dim("encoder.pos", self.encoder_positions.dim(), (config.max_positions, d))?;
        expect_dim("decoder.pos", self.decoder_positions.dim(), (config.max_positions, d))?;
        expect_dim("lm_head", self.lm_head.dim(), (d, config.vocab_size))?;
        ensure!(
            self.encoder_layers.len() == config.n_encoder_layers,
            "expected {} encoder layers, found {}",
            config.n_encoder_layers,
            self.encoder_layers.len()
        );
        ensure!(
            self.decoder_layers.len() == config.n_decoder_layers,
            "expected {} decoder layers, found {}",
            config.n_decoder_layers,
            self.decoder_layers.len()
        );
        for (i, layer) in self.encoder_layers.iter().enumerate() {
            expect_dim(
                &format!("encoder.layers.{i}.mlp_up"),
                layer.mlp_up.dim(),
                (d, config.d_ff),
            )?;
            expect_dim(
                &format!("encoder.layers.{i}.q_proj"),
                layer.self_attn.q_proj.dim(),
                (d, d),
            )?;
        }
        for (i, layer) in self.decoder_layers.iter().enumerate() {
            expect_dim(
                &format!("decoder.layers.{i}.mlp_up"),
                layer.mlp_up.dim(),
                (d, config.d_ff),
            )?;
            expect_dim(
                &format!("decoder.layers.{i}.cross.q_proj"),
                layer.cross_attn.q_proj.dim(),
                (d, d),
            )?;
        }
        Ok(())
    }
}

impl LayerNormWeights {
    pub fn identity(dim: usize) -> Self {
        Self {
            weight: Array1::ones(dim),
            bias: Array1::zeros(dim),
        }
    }
}

struct Loader<'a> {
    tensors: &'a SafeTensors<'a>,
    config: &'a ModelConfig,
}

impl Loader<'_> {
    fn attention(&self, prefix: &str) -> Result<AttentionWeights> {
        let d = self.config.d_model;
        Ok(AttentionWeights {
            q_proj: self.matrix(&format!("{prefix}.q_proj"), (d, d))?,
            k_proj: self.matrix(&format!("{prefix}.k_proj"), (d, d))?,
            v_proj: self.matrix(&format!("{prefix}.v_proj"), (d, d))?,
            out_proj: self.matrix(&format!("{prefix}.o_proj"), (d, d))?,
        })
    }

    fn norm(&self, prefix: &str) -> Result<LayerNormWeights> {
        let d = self.config.d_model;
        Ok(LayerNormWeights {
            weight: self.vector(&format!("{prefix}.weight"), d)?,
            bias: self.vector(&format!("{prefix}.bias"), d)?,
        })
    }

    fn matrix(&self, name: &str, shape: (usize, usize)) -> Result<Array2<f32>> {
        let (dims, floats) = self.floats(name)?;
        ensure!(dims.len() == 2, "expected 2D tensor for {}", name);
        expect_dim(name, (dims[0], dims[1]), shape)?;
        Array2::from_shape_vec(shape, floats).context("failed to reshape tensor")
    }

    fn vector(&self, name: &str, len: usize) -> Result<Array1<f32>> {
        let (dims, floats) = self.floats(name)?;
        ensure!(
            dims == [len],
            "tensor {} has shape {:?}, expected [{}]",
            name,
            dims,
            len
        );
        Ok(Array1::from(floats))
    }

    fn floats(&self, name: &str) -> Result<(Vec<usize>, Vec<f32>)> {
        let view = self
            .tensors
            .tensor(name)
            .with_context(|| format!("tensor '{}' not found", name))?;
        ensure!(
            view.dtype() == Dtype::F32,
            "tensor {} has dtype {:?}, only F32 is supported",
            name,
            view.dtype()
        );

        let floats = view
            .data()
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok((view.shape().to_vec(), floats))
    }
}

fn expect_dim(name: &str, actual: (usize, usize), expected: (usize, usize)) -> Result<()> {
    ensure!(
        actual == expected,
        "tensor {} has shape {:?}, expected {:?}",
        name,
        actual,
        expected
    );
    Ok(())
}
