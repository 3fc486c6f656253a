//! Transformer building blocks shared by the encoder and decoder stacks.

use crate::device::ComputeDevice;
use crate::weights::{AttentionWeights, LayerNormWeights};
use anyhow::{ensure, Result};
use ndarray::{s, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis};
use rayon::prelude::*;

pub fn layer_norm(
    data: ArrayView2<'_, f32>,
    norm: &LayerNormWeights,
    epsilon: f32,
) -> Result<Array2<f32>> {
    let feature_dim = data.ncols();
    ensure!(
        norm.weight.len() == feature_dim && norm.bias.len() == feature_dim,
        "layer norm parameters of length {} do not match feature dimension {}",
        norm.weight.len(),
        feature_dim
    );

    let mut output = data.to_owned();
    let gamma = norm.weight.view();
    let beta = norm.bias.view();

    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            let len = row.len() as f32;
            let mean = row.iter().sum::<f32>() / len;
            let var = row.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / len;
            let inv_std = 1.0 / (var + epsilon).sqrt();

            for (idx, value) in row.iter_mut().enumerate() {
                *value = (*value - mean) * inv_std * gamma[idx] + beta[idx];
            }
        });

    Ok(output)
}

pub fn softmax_inplace(mut scores: ArrayViewMut2<'_, f32>) {
    scores
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            row -= max;
            row.mapv_inplace(|x| x.exp());
            let sum = row.sum();
            row /= sum.max(f32::EPSILON);
        });
}

/// Log-probabilities over the vocabulary, widened to f64 for score accumulation.
pub fn log_softmax(logits: ArrayView1<'_, f32>) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
    let log_sum = logits
        .iter()
        .map(|&x| (x as f64 - max).exp())
        .sum::<f64>()
        .ln();
    logits
        .iter()
        .map(|&x| x as f64 - max - log_sum)
        .collect()
}

pub fn gelu_inplace(data: &mut Array2<f32>) {
    let c = (2.0 / std::f32::consts::PI).sqrt();
    data.mapv_inplace(|x| 0.5 * x * (1.0 + (c * (x + 0.044715 * x.powi(3))).tanh()));
}

/// Multi-head scaled dot-product attention over already projected tensors.
///
/// `query` is (q_len, d_model), `key`/`value` are (kv_len, d_model). No mask
/// is applied: the encoder is bidirectional and the decoder is stepped one
/// token at a time, so its cache only ever holds past positions.
pub fn multi_head_attention(
    query: ArrayView2<'_, f32>,
    key: ArrayView2<'_, f32>,
    value: ArrayView2<'_, f32>,
    n_heads: usize,
) -> Result<Array2<f32>> {
    let d_model = query.ncols();
    ensure!(
        key.ncols() == d_model && value.ncols() == d_model,
        "query dim {} must match key dim {} and value dim {}",
        d_model,
        key.ncols(),
        value.ncols()
    );
    ensure!(
        key.nrows() == value.nrows(),
        "key rows {} differ from value rows {}",
        key.nrows(),
        value.nrows()
    );
    ensure!(
        n_heads > 0 && d_model % n_heads == 0,
        "d_model {} not divisible into {} heads",
        d_model,
        n_heads
    );

    let head_dim = d_model / n_heads;
    let scale = 1.0 / (head_dim as f32).sqrt();
    let mut output = Array2::<f32>::zeros((query.nrows(), d_model));

    for h in 0..n_heads {
        let cols = s![.., h * head_dim..(h + 1) * head_dim];
        let mut scores = query.slice(cols).dot(&key.slice(cols).t());
        scores *= scale;
        softmax_inplace(scores.view_mut());
        output.slice_mut(cols).assign(&scores.dot(&value.slice(cols)));
    }

    Ok(output)
}

/// Attention block: project, attend, project back.
pub fn attention_block(
    device: ComputeDevice,
    query_input: ArrayView2<'_, f32>,
    key: ArrayView2<'_, f32>,
    value: ArrayView2<'_, f32>,
    weights: &AttentionWeights,
    n_heads: usize,
) -> Result<Array2<f32>> {
    let q = device.matmul(query_input, weights.q_proj.view())?;
    let attn = multi_head_attention(q.view(), key, value, n_heads)?;
    device.matmul(attn.view(), weights.out_proj.view())
}

pub fn feed_forward(
    device: ComputeDevice,
    data: ArrayView2<'_, f32>,
    up: &Array2<f32>,
    down: &Array2<f32>,
) -> Result<Array2<f32>> {
    let mut hidden = device.matmul(data, up.view())?;
    gelu_inplace(&mut hidden);
    device.matmul(hidden.view(), down.view())
}
