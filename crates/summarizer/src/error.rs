//! Error taxonomy of the summarization pipeline.

use std::str::Utf8Error;

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("no input text supplied")]
    EmptyInput,

    #[error("invalid generation config: {reason}")]
    InvalidConfig { reason: String },

    #[error("input is not valid UTF-8 (invalid byte sequence at offset {offset})")]
    Encoding {
        offset: usize,
        #[source]
        source: Utf8Error,
    },

    #[error("generation failed: {0:#}")]
    GenerationFailed(#[source] anyhow::Error),

    #[error("compression ratio is undefined for an original word count of zero")]
    DivisionUndefined,

    #[error("model could not be loaded: {0:#}")]
    ModelLoad(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SummarizeError>;

impl SummarizeError {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        SummarizeError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Short category name, stable for logs and JSON output.
    pub fn category(&self) -> &'static str {
        match self {
            SummarizeError::EmptyInput => "empty_input",
            SummarizeError::InvalidConfig { .. } => "invalid_config",
            SummarizeError::Encoding { .. } => "encoding",
            SummarizeError::GenerationFailed(_) => "generation_failed",
            SummarizeError::DivisionUndefined => "division_undefined",
            SummarizeError::ModelLoad(_) => "model_load",
        }
    }

    /// `DivisionUndefined` means an upstream guard was bypassed; everything
    /// else can be fixed by the caller or retried.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SummarizeError::DivisionUndefined)
    }

    /// User-facing message, one wording per category.
    pub fn notice(&self) -> String {
        match self {
            SummarizeError::EmptyInput => "Please enter or upload some text.".to_string(),
            SummarizeError::InvalidConfig { reason } => {
                format!("Summary settings are invalid: {reason}.")
            }
            SummarizeError::Encoding { offset, .. } => format!(
                "The uploaded file is not UTF-8 text (invalid bytes at offset {offset})."
            ),
            SummarizeError::GenerationFailed(err) => {
                format!("Summary generation failed, please retry: {err:#}")
            }
            SummarizeError::DivisionUndefined => {
                "Internal error: statistics requested for an empty original text.".to_string()
            }
            SummarizeError::ModelLoad(err) => format!("The model could not be loaded: {err:#}"),
        }
    }
}
