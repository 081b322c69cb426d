//! Application-wide error types.

use thiserror::Error;

use crate::llm::ProviderError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("llm error: {0}")]
    Llm(#[from] ProviderError),

    /// The requested conversation has nothing to work with yet.
    #[error("{0}")]
    NotFound(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().starts_with("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn store_error_display() {
        let e = AppError::Store("database is locked".into());
        assert!(e.to_string().contains("database is locked"));
    }

    #[test]
    fn not_found_is_bare_message() {
        let e = AppError::NotFound("Please provide user requirements.".into());
        assert_eq!(e.to_string(), "Please provide user requirements.");
    }

    #[test]
    fn provider_error_converts() {
        let e: AppError = ProviderError::Request("HTTP 500".into()).into();
        assert!(matches!(e, AppError::Llm(_)));
        assert!(e.to_string().contains("HTTP 500"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        // satisfies std::error::Error trait
        let _: &dyn Error = &e;
    }
}
