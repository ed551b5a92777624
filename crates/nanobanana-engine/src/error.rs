use std::path::PathBuf;

pub const RATE_LIMIT_DOCS_URL: &str = "https://ai.google.dev/gemini-api/docs/rate-limits";

/// Failures of a single call to the generation API.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Gemini API key is not configured; set GEMINI_API_KEY in secrets or the environment")]
    MissingApiKey,
    #[error("Gemini API quota exceeded: {message}")]
    QuotaExceeded { message: String },
    #[error("API call failed ({status}): {message}")]
    CallFailed { status: u16, message: String },
    #[error("unexpected error: {0:#}")]
    Unknown(#[from] anyhow::Error),
}

/// Why a Generate action stopped. Each variant aborts only that action.
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("please enter a prompt")]
    EmptyPrompt,
    #[error("could not read reference image {}", .0.display())]
    UnreadableReference(PathBuf),
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("no image data was returned")]
    NoImage,
}

impl StudioError {
    /// Extra hint shown under the message, if any.
    pub fn guidance(&self) -> Option<String> {
        match self {
            StudioError::Generation(GenerationError::QuotaExceeded { .. }) => Some(format!(
                "Wait a while, or check usage and billing in Google AI Studio: {RATE_LIMIT_DOCS_URL}"
            )),
            StudioError::Generation(GenerationError::MissingApiKey) => {
                Some("Add GEMINI_API_KEY to the secrets file or export it.".to_string())
            }
            _ => None,
        }
    }
}
