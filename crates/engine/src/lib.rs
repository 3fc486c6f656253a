//! Encoder-decoder generation engine for abstractive summarization.
//!
//! This crate implements a BART-shaped transformer with:
//! - Encoder stack with learned positions
//! - Decoder with self-attention KV-cache and cross-attention
//! - Length-constrained beam search
//! - Safetensors weight loading
//! - Device selection (serial f32 or rayon-parallel mixed precision)

pub mod beam;
pub mod config;
pub mod device;
pub mod engine;
pub mod kv_cache;
pub mod layers;
pub mod model;
pub mod tokenizer;
pub mod weights;

pub use beam::{BeamOutput, BeamParams};
pub use config::{ModelConfig, SpecialTokens};
pub use device::{ComputeDevice, DevicePreference, Precision};
pub use engine::{GenerationEngine, GenerationMetrics, Seq2SeqEngine};
pub use model::Seq2SeqModel;
pub use tokenizer::{Tokenizer, WordTokenizer};
pub use weights::ModelWeights;
