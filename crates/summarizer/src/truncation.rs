//! Bounds encoded input to the engine's context window.
//!
//! Truncation is lossy on purpose: trailing tokens past `max_input_tokens`
//! are dropped and the request proceeds.

use crate::error::{Result, SummarizeError};
use condense_engine::GenerationEngine;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedInput {
    ids: Vec<u32>,
}

impl EncodedInput {
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Encode `text` into at most `max_input_tokens` ids, further bounded by the
/// engine's own context window.
pub fn prepare_input<E>(engine: &E, text: &str, max_input_tokens: usize) -> Result<EncodedInput>
where
    E: GenerationEngine + ?Sized,
{
    if max_input_tokens == 0 {
        return Err(SummarizeError::invalid_config(
            "max_input_tokens must be positive",
        ));
    }

    let budget = match engine.max_input_tokens() {
        Some(context) if context < max_input_tokens => {
            debug!(
                policy = max_input_tokens,
                context, "engine context is smaller than the policy budget"
            );
            context
        }
        _ => max_input_tokens,
    };

    let mut ids = engine
        .encode(text, budget)
        .map_err(SummarizeError::GenerationFailed)?;

    if ids.len() > budget {
        warn!(
            returned = ids.len(),
            budget, "engine ignored the token budget; truncating"
        );
        ids.truncate(budget);
    }
    if ids.len() == budget {
        debug!(budget, "input reached the context limit; tail may be dropped");
    }

    Ok(EncodedInput { ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use condense_engine::BeamParams;

    /// One id per word, optionally ignoring the budget.
    struct WordIds {
        honour_budget: bool,
        context: Option<usize>,
    }

    impl GenerationEngine for WordIds {
        fn encode(&self, text: &str, max_tokens: usize) -> anyhow::Result<Vec<u32>> {
            let mut ids: Vec<u32> = (0..text.split_whitespace().count() as u32).collect();
            if self.honour_budget {
                ids.truncate(max_tokens);
            }
            Ok(ids)
        }

        fn generate(&self, _: &[u32], _: &BeamParams) -> anyhow::Result<Vec<u32>> {
            unreachable!("truncation never generates")
        }

        fn decode(&self, _: &[u32]) -> anyhow::Result<String> {
            unreachable!("truncation never decodes")
        }

        fn max_input_tokens(&self) -> Option<usize> {
            self.context
        }
    }

    #[test]
    fn no_op_under_the_limit() {
        let engine = WordIds {
            honour_budget: true,
            context: None,
        };
        let input = prepare_input(&engine, "a b c", 10).unwrap();
        assert_eq!(input.ids(), &[0, 1, 2]);
    }

    #[test]
    fn keeps_the_leading_tokens() {
        let engine = WordIds {
            honour_budget: true,
            context: None,
        };
        let full = engine.encode("a b c d e f", usize::MAX).unwrap();
        let input = prepare_input(&engine, "a b c d e f", 4).unwrap();
        assert_eq!(input.ids(), &full[..4]);
    }

    #[test]
    fn enforces_the_limit_when_the_engine_does_not() {
        let engine = WordIds {
            honour_budget: false,
            context: None,
        };
        let input = prepare_input(&engine, "a b c d e f", 4).unwrap();
        assert_eq!(input.len(), 4);
        assert_eq!(input.ids(), &[0, 1, 2, 3]);
    }

    #[test]
    fn zero_budget_is_invalid() {
        let engine = WordIds {
            honour_budget: true,
            context: None,
        };
        assert!(matches!(
            prepare_input(&engine, "a", 0),
            Err(SummarizeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn engine_context_caps_the_policy_budget() {
        let engine = WordIds {
            honour_budget: true,
            context: Some(3),
        };
        let input = prepare_input(&engine, "a b c d e f", 10).unwrap();
        assert_eq!(input.ids(), &[0, 1, 2]);

        let careless = WordIds {
            honour_budget: false,
            context: Some(3),
        };
        assert_eq!(prepare_input(&careless, "a b c d e f", 10).unwrap().len(), 3);

        // a larger context leaves the policy budget in charge
        let roomy = WordIds {
            honour_budget: true,
            context: Some(100),
        };
        assert_eq!(prepare_input(&roomy, "a b c d e f", 4).unwrap().len(), 4);
    }
}
