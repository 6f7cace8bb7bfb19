use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("No documents found to index")]
    EmptyInput,
    #[error("No knowledge base found at {}", .0.display())]
    IndexNotFound(PathBuf),
    #[error("Index was built with embedding model '{indexed}', but '{active}' is active")]
    EmbeddingMismatch { indexed: String, active: String },
    #[error("PDF extraction error: {0}")]
    PdfExtraction(String),
    #[error("DOCX extraction error: {0}")]
    DocxExtraction(String),
    #[error("WalkDir error: {0}")]
    WalkDir(#[from] walkdir::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Failures of the hosted embedding/generation provider, already classified
/// into the three cases the answer engine reports differently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("connection failed: {0}")]
    Connectivity(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("{0}")]
    Generic(String),
}

impl ProviderError {
    /// Maps an HTTP status returned by the provider.
    pub fn from_status(status: reqwest::StatusCode, detail: String) -> Self {
        match status.as_u16() {
            401 | 403 => ProviderError::Authentication(format!("{status}: {detail}")),
            _ => ProviderError::Generic(format!("API returned {status}: {detail}")),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            return ProviderError::Connectivity(err.to_string());
        }
        match err.status() {
            Some(status) => ProviderError::from_status(status, err.to_string()),
            None => ProviderError::Generic(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, QaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ProviderError::from_status(reqwest::StatusCode::UNAUTHORIZED, "bad key".into()),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            ProviderError::from_status(reqwest::StatusCode::FORBIDDEN, "nope".into()),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            ProviderError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            ProviderError::Generic(_)
        ));
    }

    #[test]
    fn test_provider_error_converts_into_qa_error() {
        let err: QaError = ProviderError::Connectivity("refused".into()).into();
        assert!(matches!(err, QaError::Provider(ProviderError::Connectivity(_))));
        assert_eq!(err.to_string(), "connection failed: refused");
    }
}
