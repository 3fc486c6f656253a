//! Input validation and measurement.

use crate::error::{Result, SummarizeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedText<'a> {
    /// The caller's text, byte for byte.
    pub text: &'a str,
    pub word_count: usize,
}

/// Number of whitespace-delimited tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Validate raw input without altering it. Empty or whitespace-only input is
/// rejected so the pipeline never reaches generation.
pub fn normalize(raw: &str) -> Result<NormalizedText<'_>> {
    let word_count = word_count(raw);
    if word_count == 0 {
        return Err(SummarizeError::EmptyInput);
    }
    Ok(NormalizedText {
        text: raw,
        word_count,
    })
}

/// Decode uploaded bytes as strict UTF-8.
pub fn decode_upload(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|err| {
        let source = err.utf8_error();
        SummarizeError::Encoding {
            offset: source.valid_up_to(),
            source,
        }
    })
}
