//! Length-constrained beam search.
//!
//! Scores are summed log-probabilities in f64. Candidates with equal scores
//! rank by lower parent beam index, then lower token id, so the search is
//! fully deterministic.

use crate::config::SpecialTokens;
use crate::layers::log_softmax;
use anyhow::{bail, ensure, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamParams {
    pub num_beams: usize,
    /// Minimum number of generated tokens, terminal token included.
    pub min_length: usize,
    /// Maximum number of generated tokens, terminal token included.
    pub max_length: usize,
    /// Stop once `num_beams` hypotheses have emitted the terminal token.
    pub early_stopping: bool,
    /// Exponent on hypothesis length when ranking finished hypotheses.
    pub length_penalty: f64,
}

impl Default for BeamParams {
    fn default() -> Self {
        Self {
            num_beams: 4,
            min_length: 30,
            max_length: 130,
            early_stopping: true,
            length_penalty: 1.0,
        }
    }
}

impl BeamParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_beams >= 1, "num_beams must be at least 1");
        ensure!(
            self.min_length <= self.max_length,
            "min_length {} exceeds max_length {}",
            self.min_length,
            self.max_length
        );
        ensure!(
            self.length_penalty.is_finite(),
            "length_penalty must be finite"
        );
        Ok(())
    }
}

/// One autoregressive decoding step over caller-owned state.
pub trait StepDecoder {
    type State: Clone;

    fn initial_state(&self) -> Result<Self::State>;

    /// Feed `token` and return logits for the next position.
    fn step(&self, state: &mut Self::State, token: u32) -> Result<Array1<f32>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeamOutput {
    pub tokens: Vec<u32>,
    pub score: f64,
    pub finished_hypotheses: usize,
    pub steps: usize,
}

struct Beam<S> {
    tokens: Vec<u32>,
    score: f64,
    state: S,
}

struct Hypothesis {
    tokens: Vec<u32>,
    score: f64,
}

impl Hypothesis {
    fn normalized_score(&self, length_penalty: f64) -> f64 {
        let len = self.tokens.len().max(1) as f64;
        self.score / len.powf(length_penalty)
    }
}

struct Candidate {
    beam: usize,
    token: u32,
    score: f64,
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.beam.cmp(&b.beam))
        .then(a.token.cmp(&b.token))
}

/// Indices of the `k` best log-probabilities not rejected by `banned`.
fn top_tokens(log_probs: &[f64], k: usize, banned: impl Fn(u32) -> bool) -> Vec<(u32, f64)> {
    let mut pool: Vec<(u32, f64)> = log_probs
        .iter()
        .enumerate()
        .map(|(idx, &lp)| (idx as u32, lp))
        .filter(|&(idx, lp)| lp.is_finite() && !banned(idx))
        .collect();

    let order = |a: &(u32, f64), b: &(u32, f64)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
    if pool.len() > k {
        pool.select_nth_unstable_by(k, order);
        pool.truncate(k);
    }
    pool.sort_by(order);
    pool
}

/// Run beam search over `decoder`.
///
/// `decodable[id]` marks ids the tokenizer can turn back into text; any other
/// id, and ids past the end of the slice, are never generated.
pub fn beam_search<D: StepDecoder>(
    decoder: &D,
    params: &BeamParams,
    special: &SpecialTokens,
    decodable: &[bool],
) -> Result<BeamOutput> {
    params.validate()?;

    if params.max_length == 0 {
        return Ok(BeamOutput {
            tokens: Vec::new(),
            score: 0.0,
            finished_hypotheses: 0,
            steps: 0,
        });
    }

    let num_beams = params.num_beams;
    let mut live = vec![Beam {
        tokens: Vec::with_capacity(params.max_length),
        score: 0.0,
        state: decoder.initial_state()?,
    }];
    let mut finished: Vec<Hypothesis> = Vec::new();
    let mut steps = 0;

    while !live.is_empty() {
        steps += 1;
        let mut candidates = Vec::with_capacity(live.len() * 2 * num_beams);

        for (beam_idx, beam) in live.iter_mut().enumerate() {
            let last = beam
                .tokens
                .last()
                .copied()
                .unwrap_or(special.decoder_start);
            let logits = decoder.step(&mut beam.state, last)?;
            if logits.iter().any(|x| x.is_nan()) {
                bail!("decoder produced NaN logits at step {}", steps);
            }

            let log_probs = log_softmax(logits.view());
            let allow_eos = beam.tokens.len() + 1 >= params.min_length;
            let banned = |token: u32| {
                token == special.pad
                    || token == special.bos
                    || token == special.unk
                    || (token == special.eos && !allow_eos)
                    || (token != special.eos
                        && !decodable.get(token as usize).copied().unwrap_or(false))
            };

            for (token, log_prob) in top_tokens(&log_probs, 2 * num_beams, banned) {
                candidates.push(Candidate {
                    beam: beam_idx,
                    token,
                    score: beam.score + log_prob,
                });
            }
        }

        if candidates.is_empty() {
            bail!("no admissible token at step {}", steps);
        }
        candidates.sort_by(rank);

        let mut next = Vec::with_capacity(num_beams);
        for (position, candidate) in candidates.into_iter().enumerate() {
            if next.len() == num_beams {
                break;
            }

            let parent = &live[candidate.beam];
            let mut tokens = parent.tokens.clone();
            tokens.push(candidate.token);

            if candidate.token == special.eos {
                // Terminal tokens ranked below the beam width do not count.
                if position < num_beams {
                    finished.push(Hypothesis {
                        tokens,
                        score: candidate.score,
                    });
                }
                continue;
            }

            next.push(Beam {
                tokens,
                score: candidate.score,
                state: parent.state.clone(),
            });
        }

        if params.early_stopping && finished.len() >= num_beams {
            break;
        }

        let (done, running): (Vec<_>, Vec<_>) = next
            .into_iter()
            .partition(|beam| beam.tokens.len() >= params.max_length);
        finished.extend(done.into_iter().map(|beam| Hypothesis {
            tokens: beam.tokens,
            score: beam.score,
        }));
        live = running;
    }

    let mut best: Option<&Hypothesis> = None;
    for hypothesis in &finished {
        let better = match best {
            None => true,
            Some(current) => {
                hypothesis.normalized_score(params.length_penalty)
                    > current.normalized_score(params.length_penalty)
            }
        };
        if better {
            best = Some(hypothesis);
        }
    }

    match best {
        Some(best) => Ok(BeamOutput {
            tokens: best.tokens.clone(),
            score: best.score,
            finished_hypotheses: finished.len(),
            steps,
        }),
        None => bail!("beam search finished without a hypothesis"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const VOCAB: usize = 8;
    const ALL: [bool; VOCAB] = [true; VOCAB];

    /// Scripted decoder: logits depend only on the number of tokens fed so far
    /// and the last token, through a caller-supplied table.
    struct Scripted<F: Fn(usize, u32) -> Vec<f32>> {
        table: F,
        calls: Cell<usize>,
    }

    impl<F: Fn(usize, u32) -> Vec<f32>> Scripted<F> {
        fn new(table: F) -> Self {
            Self {
                table,
                calls: Cell::new(0),
            }
        }
    }

    impl<F: Fn(usize, u32) -> Vec<f32>> StepDecoder for Scripted<F> {
        type State = usize;

        fn initial_state(&self) -> Result<usize> {
            Ok(0)
        }

        fn step(&self, state: &mut usize, token: u32) -> Result<Array1<f32>> {
            self.calls.set(self.calls.get() + 1);
            let logits = (self.table)(*state, token);
            *state += 1;
            Ok(Array1::from(logits))
        }
    }

    fn one_hot(token: u32) -> Vec<f32> {
        let mut logits = vec![0.0; VOCAB];
        logits[token as usize] = 10.0;
        logits
    }

    fn params(num_beams: usize, min_length: usize, max_length: usize) -> BeamParams {
        BeamParams {
            num_beams,
            min_length,
            max_length,
            early_stopping: true,
            length_penalty: 1.0,
        }
    }

    #[test]
    fn eos_is_masked_until_min_length() {
        // Always prefers EOS; the floor forces three tokens first.
        let decoder = Scripted::new(|_, _| one_hot(2));
        let out = beam_search(&decoder, &params(2, 4, 10), &SpecialTokens::default(), &ALL).unwrap();
        assert_eq!(out.tokens.len(), 4);
        assert_eq!(*out.tokens.last().unwrap(), 2);
        assert!(out.tokens[..3].iter().all(|&t| t != 2));
    }

    #[test]
    fn never_exceeds_max_length() {
        // EOS is never competitive.
        let decoder = Scripted::new(|_, _| {
            let mut logits = one_hot(5);
            logits[2] = -100.0;
            logits
        });
        let out = beam_search(&decoder, &params(3, 0, 6), &SpecialTokens::default(), &ALL).unwrap();
        assert_eq!(out.tokens.len(), 6);
        assert!(out.steps <= 6);
    }

    #[test]
    fn early_stopping_ends_the_search() {
        let decoder = Scripted::new(|_, _| one_hot(2));
        let out = beam_search(&decoder, &params(1, 0, 50), &SpecialTokens::default(), &ALL).unwrap();
        assert_eq!(out.tokens, vec![2]);
        assert_eq!(out.steps, 1);
        assert_eq!(decoder.calls.get(), 1);
    }

    #[test]
    fn zero_max_length_skips_decoding() {
        let decoder = Scripted::new(|_, _| one_hot(5));
        let out = beam_search(&decoder, &params(4, 0, 0), &SpecialTokens::default(), &ALL).unwrap();
        assert!(out.tokens.is_empty());
        assert_eq!(decoder.calls.get(), 0);
    }

    #[test]
    fn ties_resolve_to_lowest_token() {
        // Uniform logits: every admissible token ties.
        let decoder = Scripted::new(|_, _| vec![1.0; VOCAB]);
        let out = beam_search(&decoder, &params(2, 0, 3), &SpecialTokens::default(), &ALL).unwrap();
        // eos (2) is the lowest admissible id and ranks first.
        assert_eq!(out.tokens, vec![2]);

        let out = beam_search(&decoder, &params(2, 3, 3), &SpecialTokens::default(), &ALL).unwrap();
        assert_eq!(out.tokens, vec![4, 4, 2]);
    }

    #[test]
    fn beam_search_beats_greedy_on_a_trap() {
        // Greedy takes 5 (slightly better) and then faces a flat distribution;
        // 6 leads to a confident EOS.
        let decoder = Scripted::new(|position, last| match (position, last) {
            (0, _) => {
                let mut logits = vec![-10.0; VOCAB];
                logits[5] = 1.1;
                logits[6] = 1.0;
                logits
            }
            (_, 6) => one_hot(2),
            _ => vec![0.0; VOCAB],
        });

        let greedy = beam_search(&decoder, &params(1, 0, 2), &SpecialTokens::default(), &ALL).unwrap();
        assert_eq!(greedy.tokens[0], 5);

        let beam = beam_search(&decoder, &params(2, 0, 2), &SpecialTokens::default(), &ALL).unwrap();
        assert_eq!(beam.tokens, vec![6, 2]);
        assert!(beam.score > greedy.score);
    }

    #[test]
    fn control_tokens_are_never_generated() {
        let decoder = Scripted::new(|_, _| {
            let mut logits = vec![0.0; VOCAB];
            logits[0] = 50.0;
            logits[1] = 50.0;
            logits[3] = 50.0;
            logits[7] = 1.0;
            logits
        });
        let out = beam_search(&decoder, &params(2, 2, 2), &SpecialTokens::default(), &ALL).unwrap();
        assert!(out.tokens.iter().all(|&t| t != 0 && t != 1 && t != 3));
    }

    #[test]
    fn undecodable_ids_are_never_generated() {
        // 7 dominates but has no token behind it.
        let decoder = Scripted::new(|_, _| {
            let mut logits = vec![0.0; VOCAB];
            logits[7] = 50.0;
            logits[6] = 1.0;
            logits
        });
        let mut decodable = ALL;
        decodable[7] = false;
        let out = beam_search(&decoder, &params(2, 3, 3), &SpecialTokens::default(), &decodable)
            .unwrap();
        assert_eq!(out.tokens.len(), 3);
        assert_eq!(out.tokens[0], 6);
        assert!(!out.tokens.contains(&7));

        // Ids past the end of the mask count as undecodable.
        let out = beam_search(&decoder, &params(2, 3, 3), &SpecialTokens::default(), &ALL[..7])
            .unwrap();
        assert!(!out.tokens.contains(&7));
    }

    #[test]
    fn nan_logits_fail_the_search() {
        let decoder = Scripted::new(|_, _| vec![f32::NAN; VOCAB]);
        assert!(beam_search(&decoder, &params(2, 0, 4), &SpecialTokens::default(), &ALL).is_err());
    }

    #[test]
    fn invalid_params_are_rejected() {
        let decoder = Scripted::new(|_, _| one_hot(2));
        assert!(beam_search(&decoder, &params(0, 0, 4), &SpecialTokens::default(), &ALL).is_err());
        assert!(beam_search(&decoder, &params(2, 5, 4), &SpecialTokens::default(), &ALL).is_err());
    }
}
