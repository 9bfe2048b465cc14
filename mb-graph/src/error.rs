use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    /// Credentials are missing, ambiguous, or cannot be resolved for a page.
    /// Raised before any request is sent.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Graph API answered with a non-2xx status or an `error` object.
    #[error("graph api error: status={status} code={code:?} message={message}")]
    Upstream {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),
}

impl GraphError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs carry the page access token in the query string.
        Self::Http(e.without_url().to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
