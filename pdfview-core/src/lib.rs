use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

mod config;
mod coordinator;
mod error;
mod store;
mod viewer;

pub use config::ViewerConfig;
pub use coordinator::{RenderCoordinator, RenderJob, RenderState};
pub use error::{ViewerError, NOT_A_PDF_MESSAGE};
pub use store::{
    FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, SessionStore, DOCUMENT_DATA_KEY,
    PAGE_NUMBER_KEY,
};
pub use viewer::{Viewer, ViewerStatus};

/// Pixel size of a page at a given scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    /// RGBA, 8 bits per channel.
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    DocumentLoaded { page_count: usize },
    PageNumberChanged(usize),
    RenderFailed { page: usize, message: String },
}

/// An opened document. Page numbers are 1-based.
pub trait DocumentHandle: Send + Sync {
    fn page_count(&self) -> usize;
    fn viewport(&self, page: usize, scale: f32) -> Result<Viewport>;
    fn render_page(&self, page: usize, scale: f32) -> Result<RenderImage>;
}

#[async_trait::async_trait]
pub trait DocumentOpener: Send + Sync {
    async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn DocumentHandle>>;
}

/// A user-chosen file that passed the extension check.
#[derive(Debug, Clone)]
pub struct FileSelection {
    path: PathBuf,
}

impl FileSelection {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ViewerError> {
        let path = path.into();
        let accepted = path
            .file_name()
            .map(|name| is_pdf_file_name(&name.to_string_lossy()))
            .unwrap_or(false);
        if !accepted {
            return Err(ViewerError::NotAPdf { path });
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub fn is_pdf_file_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 4 && bytes[bytes.len() - 4..].eq_ignore_ascii_case(b".pdf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_check_ignores_case() {
        assert!(is_pdf_file_name("report.pdf"));
        assert!(is_pdf_file_name("report.PDF"));
        assert!(is_pdf_file_name("Report.Pdf"));
        assert!(is_pdf_file_name(".pdf"));
        assert!(!is_pdf_file_name("report.txt"));
        assert!(!is_pdf_file_name("report.pdf.txt"));
        assert!(!is_pdf_file_name("reportpdf"));
        assert!(!is_pdf_file_name("pdf"));
    }

    #[test]
    fn file_selection_uses_file_name_only() {
        assert!(FileSelection::new("/tmp/archive.pdf/notes.txt").is_err());
        let selection = FileSelection::new("/tmp/docs/Report.PDF").unwrap();
        assert_eq!(selection.file_name(), "Report.PDF");
    }

    #[test]
    fn rejected_selection_carries_user_message() {
        let err = FileSelection::new("report.txt").unwrap_err();
        assert_eq!(err.to_string(), NOT_A_PDF_MESSAGE);
        assert_eq!(err.user_message(), NOT_A_PDF_MESSAGE);
    }
}
