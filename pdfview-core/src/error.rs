use std::path::PathBuf;

use thiserror::Error;

/// Message shown when the chosen file does not look like a PDF.
pub const NOT_A_PDF_MESSAGE: &str = "Please select a pdf file...";

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Please select a pdf file...")]
    NotAPdf { path: PathBuf },
    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open document")]
    Open(#[source] anyhow::Error),
    #[error("failed to render page {page}")]
    Render {
        page: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to load config from {path:?}")]
    Config {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl ViewerError {
    /// Short text suitable for the status line, including the root cause.
    pub fn user_message(&self) -> String {
        match self {
            ViewerError::NotAPdf { .. } => NOT_A_PDF_MESSAGE.to_string(),
            ViewerError::Read { source, .. } => format!("{self}: {source}"),
            ViewerError::Open(source)
            | ViewerError::Render { source, .. }
            | ViewerError::Config { source, .. } => format!("{self}: {source:#}"),
        }
    }
}
