use crate::error::{Result, SummarizeError};
use condense_engine::GenerationEngine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    /// Generated tokens the text was decoded from.
    pub token_count: usize,
}

/// Turn generated ids into text; the engine strips control tokens.
pub fn decode<E>(engine: &E, tokens: &[u32]) -> Result<Summary>
where
    E: GenerationEngine + ?Sized,
{
    let text = engine
        .decode(tokens)
        .map_err(SummarizeError::GenerationFailed)?;
    Ok(Summary {
        text,
        token_count: tokens.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use condense_engine::{BeamParams, WordTokenizer};

    /// Decoding backed by the word tokenizer only.
    struct Words(WordTokenizer);

    impl GenerationEngine for Words {
        fn encode(&self, text: &str, _: usize) -> anyhow::Result<Vec<u32>> {
            Ok(self.0.encode(text))
        }

        fn generate(&self, _: &[u32], _: &BeamParams) -> anyhow::Result<Vec<u32>> {
            anyhow::bail!("not used")
        }

        fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
            Ok(self.0.decode(ids))
        }
    }

    #[test]
    fn strips_control_tokens() {
        let engine = Words(WordTokenizer::new(256));
        let ids = engine.encode("the lazy dog", 16).unwrap();
        let summary = decode(&engine, &ids).unwrap();
        assert_eq!(summary.text, "the lazy dog");
        assert_eq!(summary.token_count, ids.len());
    }

    #[test]
    fn is_deterministic() {
        let engine = Words(WordTokenizer::new(256));
        let ids = engine.encode("over the fox", 16).unwrap();
        assert_eq!(decode(&engine, &ids).unwrap(), decode(&engine, &ids).unwrap());
    }

    #[test]
    fn empty_sequence_decodes_to_empty_text() {
        let engine = Words(WordTokenizer::new(256));
        let summary = decode(&engine, &[]).unwrap();
        assert!(summary.text.is_empty());
        assert_eq!(summary.token_count, 0);
    }
}
