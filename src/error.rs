use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiphrError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse arXiv feed: {0}")]
    FeedError(String),

    #[error("PDF extraction failed: {0}")]
    PdfError(String),

    #[error("Malformed output table: {0}")]
    MalformedTable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing API key: set {0}")]
    MissingApiKey(&'static str),

    #[error("No arXiv tags provided")]
    NoTagsProvided,

    #[error("No questions configured")]
    NoQuestions,

    #[error("Intermediate file not found: {0:?}")]
    MissingHandoff(PathBuf),
}
