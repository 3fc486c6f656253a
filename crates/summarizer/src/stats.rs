use crate::error::{Result, SummarizeError};
use crate::normalize::word_count;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub original_word_count: usize,
    pub summary_word_count: usize,
    /// Summary length as a percentage of the original, two decimals.
    pub compression_ratio: f64,
}

/// Measure a summary against the original word count.
///
/// `original_word_count` must be the count of the untruncated input. The
/// ratio is rounded to two decimals, half away from zero.
pub fn compute_stats(original_word_count: usize, summary_text: &str) -> Result<SummaryStats> {
    if original_word_count == 0 {
        return Err(SummarizeError::DivisionUndefined);
    }
    let summary_word_count = word_count(summary_text);
    let ratio = summary_word_count as f64 / original_word_count as f64 * 100.0;
    Ok(SummaryStats {
        original_word_count,
        summary_word_count,
        compression_ratio: round2(ratio),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl fmt::Display for SummaryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Original Words: {}", self.original_word_count)?;
        writeln!(f, "Summary Words: {}", self.summary_word_count)?;
        write!(
            f,
            "Compression Ratio: {:.2}% of original",
            self.compression_ratio
        )
    }
}
