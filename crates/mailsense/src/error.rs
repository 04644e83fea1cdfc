use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Template corpus error: {0}")]
    Corpus(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn error_display_messages() {
        let err = Error::Api {
            status: 429,
            message: "rate limited".into(),
        };
        assert_eq!(err.to_string(), "API error (429): rate limited");

        let err = Error::Timeout(Duration::from_secs(90));
        assert_eq!(err.to_string(), "LLM request timed out after 90s");

        let err = Error::Provider("empty choices array in response".into());
        assert_eq!(
            err.to_string(),
            "Provider error: empty choices array in response"
        );
    }

    #[test]
    fn error_corpus_display_message() {
        let err = Error::Corpus("missing templates field".into());
        assert_eq!(
            err.to_string(),
            "Template corpus error: missing templates field"
        );
    }

    #[test]
    fn error_config_display_message() {
        let err = Error::Config("worker count must be non-zero".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: worker count must be non-zero"
        );
    }
}
