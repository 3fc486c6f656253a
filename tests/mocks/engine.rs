use condense::{BeamParams, GenerationEngine};
use std::sync::{Arc, Mutex};

/// Word-per-id engine that records every call it receives.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    pub summary_len: usize,
    pub fail_with: Option<String>,
    pub encode_calls: Arc<Mutex<Vec<usize>>>,
    pub generate_calls: Arc<Mutex<Vec<(Vec<u32>, BeamParams)>>>,
    pub decode_calls: Arc<Mutex<Vec<Vec<u32>>>>,
}

impl RecordingEngine {
    pub fn new(summary_len: usize) -> Self {
        Self {
            summary_len,
            ..Self::default()
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            fail_with: Some(msg.to_string()),
            ..Self::default()
        }
    }

    /// Ids for every word of `text`, without a budget.
    pub fn ids_for(text: &str) -> Vec<u32> {
        (0..text.split_whitespace().count() as u32)
            .map(|i| i + 100)
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.encode_calls.lock().unwrap().len()
            + self.generate_calls.lock().unwrap().len()
            + self.decode_calls.lock().unwrap().len()
    }
}

impl GenerationEngine for RecordingEngine {
    fn encode(&self, text: &str, max_tokens: usize) -> anyhow::Result<Vec<u32>> {
        self.encode_calls.lock().unwrap().push(max_tokens);
        let mut ids = Self::ids_for(text);
        ids.truncate(max_tokens);
        Ok(ids)
    }

    fn generate(&self, input_ids: &[u32], params: &BeamParams) -> anyhow::Result<Vec<u32>> {
        self.generate_calls
            .lock()
            .unwrap()
            .push((input_ids.to_vec(), *params));
        if let Some(ref msg) = self.fail_with {
            return Err(anyhow::anyhow!("{}", msg));
        }
        Ok((0..self.summary_len as u32).map(|i| i + 10).collect())
    }

    fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
        self.decode_calls.lock().unwrap().push(ids.to_vec());
        Ok(ids
            .iter()
            .map(|id| format!("w{id}"))
            .collect::<Vec<_>>()
            .join(" "))
    }
}
