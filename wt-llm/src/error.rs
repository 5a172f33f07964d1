use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transport failure before any status code was seen.
    #[error("transport error: {0}")]
    Http(String),

    #[error("{provider} rejected chat request (status {status}): {body}")]
    Provider {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),
}

impl LlmError {
    /// Rate limits, provider-side failures and transport errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Provider { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidInput(_) | Self::ResponseFormat(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(format!("json decode: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_classify_by_status() {
        let throttled = LlmError::Provider {
            provider: "openai",
            status: 429,
            body: "slow down".to_string(),
        };
        assert!(throttled.is_transient());
        assert_eq!(
            throttled.to_string(),
            "openai rejected chat request (status 429): slow down"
        );

        let unauthorized = LlmError::Provider {
            provider: "anthropic",
            status: 401,
            body: String::new(),
        };
        assert!(!unauthorized.is_transient());
        assert!(!LlmError::InvalidInput("x".to_string()).is_transient());
    }
}
