//! Decoder self-attention KV-cache.
//!
//! One cache belongs to one beam. The encoder output and the cross-attention
//! keys/values are computed once per request and shared by every beam, so
//! only the self-attention history lives here. Forking a beam clones its cache.

use anyhow::{ensure, Result};
use ndarray::{concatenate, Array2, ArrayView2, Axis};

#[derive(Debug, Clone)]
pub struct KVCache {
    /// Cached keys per layer: (current_len, d_model)
    keys: Vec<Array2<f32>>,
    /// Cached values per layer: (current_len, d_model)
    values: Vec<Array2<f32>>,
    max_len: usize,
}

impl KVCache {
    pub fn new(n_layers: usize, max_len: usize, d_model: usize) -> Self {
        Self {
            keys: (0..n_layers).map(|_| Array2::zeros((0, d_model))).collect(),
            values: (0..n_layers).map(|_| Array2::zeros((0, d_model))).collect(),
            max_len,
        }
    }

    /// Append new keys/values for a given layer.
    /// new_k, new_v: (new_len, d_model)
    pub fn append(&mut self, layer: usize, new_k: Array2<f32>, new_v: Array2<f32>) -> Result<()> {
        ensure!(layer < self.keys.len(), "layer {} out of range", layer);
        ensure!(
            new_k.dim() == new_v.dim(),
            "key shape {:?} differs from value shape {:?}",
            new_k.dim(),
            new_v.dim()
        );
        let new_len = self.keys[layer].nrows() + new_k.nrows();
        ensure!(
            new_len <= self.max_len,
            "decoder exceeded max sequence length {}",
            self.max_len
        );

        self.keys[layer] = concatenate(Axis(0), &[self.keys[layer].view(), new_k.view()])?;
        self.values[layer] = concatenate(Axis(0), &[self.values[layer].view(), new_v.view()])?;
        Ok(())
    }

    pub fn get(&self, layer: usize) -> (ArrayView2<'_, f32>, ArrayView2<'_, f32>) {
        (self.keys[layer].view(), self.values[layer].view())
    }

    /// Positions fully written, i.e. present in every layer.
    pub fn len(&self) -> usize {
        self.keys.iter().map(Array2::nrows).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes per token for this cache
    pub fn bytes_per_token(&self) -> usize {
        let d_model = self.keys.first().map(Array2::ncols).unwrap_or(0);
        // 2 (K+V) * n_layers * d_model * sizeof(f32)
        2 * self.keys.len() * d_model * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_cache_grows_per_step() {
        let mut cache = KVCache::new(2, 128, 64);
        assert!(cache.is_empty());

        for layer in 0..2 {
            cache
                .append(layer, Array2::ones((1, 64)), Array2::ones((1, 64)))
                .unwrap();
        }
        assert_eq!(cache.len(), 1);

        cache
            .append(0, Array2::ones((1, 64)), Array2::ones((1, 64)))
            .unwrap();
        // layer 1 has not caught up yet
        assert_eq!(cache.len(), 1);
        cache
            .append(1, Array2::ones((1, 64)), Array2::ones((1, 64)))
            .unwrap();
        assert_eq!(cache.len(), 2);

        let (k, v) = cache.get(0);
        assert_eq!(k.dim(), (2, 64));
        assert_eq!(v.dim(), (2, 64));
    }

    #[test]
    fn forked_caches_are_independent() {
        let mut parent = KVCache::new(1, 8, 4);
        parent
            .append(0, Array2::ones((1, 4)), Array2::ones((1, 4)))
            .unwrap();
        let mut child = parent.clone();
        child
            .append(0, Array2::zeros((1, 4)), Array2::zeros((1, 4)))
            .unwrap();
        assert_eq!(parent.len(), 1);
        assert_eq!(child.len(), 2);
    }

    #[test]
    fn kv_cache_enforces_capacity() {
        let mut cache = KVCache::new(1, 2, 4);
        cache
            .append(0, Array2::ones((2, 4)), Array2::ones((2, 4)))
            .unwrap();
        assert!(cache
            .append(0, Array2::ones((1, 4)), Array2::ones((1, 4)))
            .is_err());
    }

    #[test]
    fn kv_cache_bytes_per_token() {
        let cache = KVCache::new(12, 1024, 1024);
        // 2 * 12 layers * 1024 * 4 bytes
        assert_eq!(cache.bytes_per_token(), 98304);
    }
}
