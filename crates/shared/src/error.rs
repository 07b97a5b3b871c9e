use thiserror::Error;

/// Failures that make a single document unextractable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("title not found or empty")]
    MissingTitle,

    #[error("content root not found")]
    MissingContent,

    #[error("invalid CSS selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// Key-value store read/write failure.
#[derive(Debug, Error)]
#[error("persistence error on `{key}`: {message}")]
pub struct PersistenceError {
    pub key: String,
    pub message: String,
}

impl PersistenceError {
    pub fn new(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

/// Per-document failures. None of these abort a crawl pass.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing title")]
    MissingTitle,

    #[error("missing content")]
    MissingContent,

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("invalid listing: {0}")]
    InvalidListing(String),

    #[error("invalid selector: {0}")]
    Selector(String),
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::MissingTitle => PipelineError::MissingTitle,
            ExtractError::MissingContent => PipelineError::MissingContent,
            other @ ExtractError::InvalidSelector { .. } => {
                PipelineError::Selector(other.to_string())
            }
        }
    }
}

/// Where in the per-document flow a failure happened, for log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Extract,
    Generate,
    Publish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Generate => "generate",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}
