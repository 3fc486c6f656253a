//! Process-wide model host: loads the engine once, on first use, and hands
//! out shared read-only handles.

use crate::error::{Result, SummarizeError};
use crate::generation::GenerationConfig;
use crate::pipeline::Summarizer;
use anyhow::Context;
use condense_engine::{
    DevicePreference, ModelConfig, ModelWeights, Seq2SeqEngine, Seq2SeqModel, Tokenizer,
    WordTokenizer,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub model: ModelConfig,
    /// Safetensors checkpoint. Seeded random weights when absent.
    pub weights: Option<PathBuf>,
    /// Pretrained `tokenizer.json`; takes precedence over `vocab`.
    pub tokenizer: Option<PathBuf>,
    /// JSON word vocabulary for the built-in word tokenizer.
    pub vocab: Option<PathBuf>,
    pub device: DevicePreference,
    pub seed: u64,
    pub generation: GenerationConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::tiny(),
            weights: None,
            tokenizer: None,
            vocab: None,
            device: DevicePreference::Auto,
            seed: 0,
            generation: GenerationConfig::default(),
        }
    }
}

impl HostConfig {
    /// Read a JSON config. Fields absent from the file take their defaults;
    /// a missing file is an error.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read host config {}", path.display()))?;
        let config = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse host config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let blob = serde_json::to_vec_pretty(self)?;
        fs::write(path, blob)?;
        Ok(())
    }
}

pub struct ModelHost {
    config: HostConfig,
    engine: OnceCell<Arc<Seq2SeqEngine>>,
}

impl ModelHost {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            engine: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.get().is_some()
    }

    /// The shared engine, loading it on first call. A failed load leaves the
    /// host empty so the next call retries.
    pub fn engine(&self) -> Result<Arc<Seq2SeqEngine>> {
        self.engine
            .get_or_try_init(|| load_engine(&self.config).map(Arc::new))
            .map(Arc::clone)
            .map_err(SummarizeError::ModelLoad)
    }

    /// A pipeline over the shared engine using the host's generation policy.
    pub fn summarizer(&self) -> Result<Summarizer<Seq2SeqEngine>> {
        Ok(Summarizer::with_policy(
            self.engine()?,
            self.config.generation,
        ))
    }
}

fn load_engine(config: &HostConfig) -> anyhow::Result<Seq2SeqEngine> {
    let device = config.device.resolve();
    info!(preference = ?config.device, ?device, "compute device resolved");

    let weights = match &config.weights {
        Some(path) => {
            info!(path = %path.display(), "loading weights from safetensors");
            ModelWeights::load_safetensors(path, &config.model)?
        }
        None => {
            warn!(seed = config.seed, "using random weights (not pretrained)");
            ModelWeights::random(&config.model, config.seed)
        }
    };

    let tokenizer = match (&config.tokenizer, &config.vocab) {
        (Some(path), _) => {
            info!(path = %path.display(), "loading pretrained tokenizer");
            Tokenizer::from_pretrained_file(path)?
        }
        (None, Some(path)) => {
            info!(path = %path.display(), "loading word vocabulary");
            WordTokenizer::from_vocab_file(path)?.into()
        }
        (None, None) => WordTokenizer::new(config.model.vocab_size).into(),
    };

    let model = Seq2SeqModel::new(config.model.clone(), weights, device)?;
    let engine = Seq2SeqEngine::new(model, tokenizer)?;
    info!(
        vocab_size = config.model.vocab_size,
        d_model = config.model.d_model,
        encoder_layers = config.model.n_encoder_layers,
        decoder_layers = config.model.n_decoder_layers,
        "model host ready"
    );
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("condense-host-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn loads_lazily_and_once() {
        let host = ModelHost::new(HostConfig::default());
        assert!(!host.is_loaded());

        let first = host.engine().unwrap();
        assert!(host.is_loaded());
        let second = host.engine().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn concurrent_callers_share_one_engine() {
        let host = Arc::new(ModelHost::new(HostConfig::default()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let host = Arc::clone(&host);
                thread::spawn(move || host.engine().unwrap())
            })
            .collect();
        let engines: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for engine in &engines[1..] {
            assert!(Arc::ptr_eq(&engines[0], engine));
        }
    }

    #[test]
    fn failed_load_is_reported_and_retried() {
        let config = HostConfig {
            weights: Some(PathBuf::from("/nonexistent/condense/model.safetensors")),
            ..HostConfig::default()
        };
        let host = ModelHost::new(config);
        assert!(matches!(host.engine(), Err(SummarizeError::ModelLoad(_))));
        assert!(!host.is_loaded());
        assert!(host.engine().is_err());
    }

    #[test]
    fn device_preference_is_honoured() {
        let config = HostConfig {
            device: DevicePreference::Cpu,
            ..HostConfig::default()
        };
        let engine = ModelHost::new(config).engine().unwrap();
        assert_eq!(engine.model().device(), condense_engine::ComputeDevice::Cpu);
    }

    #[test]
    fn config_file_roundtrip_and_missing_file() {
        let dir = scratch_dir("config");
        let path = dir.join("host.json");
        let _ = fs::remove_file(&path);
        let err = HostConfig::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("host.json"));

        let config = HostConfig {
            seed: 17,
            device: DevicePreference::Accelerated,
            ..HostConfig::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(HostConfig::load_from_file(&path).unwrap(), config);

        fs::write(&path, r#"{"seed": 3, "generation": {"min_length": 10}}"#).unwrap();
        let partial = HostConfig::load_from_file(&path).unwrap();
        assert_eq!(partial.seed, 3);
        assert_eq!(partial.generation.min_length, 10);
        assert_eq!(partial.generation.max_length, 130);
        assert_eq!(partial.model, ModelConfig::tiny());

        fs::remove_dir_all(dir).unwrap();
    }
}
