//! Per-page text extraction for source documents.
//!
//! [`DocumentReader`] is the boundary trait the pipeline consumes; the
//! concrete [`PdfReader`] wraps `pdf-extract`. Unreadable or malformed
//! files are rejected with an error and never partially processed.

use anyhow::{Context, Result};
use std::path::Path;

use crate::models::Page;

/// Reads a source document into an ordered sequence of pages.
pub trait DocumentReader: Send + Sync {
    /// Extract per-page text. Page numbers are 1-indexed and ordered.
    fn read(&self, file_path: &Path) -> Result<Vec<Page>>;
}

/// PDF reader backed by `pdf-extract`.
pub struct PdfReader;

impl DocumentReader for PdfReader {
    fn read(&self, file_path: &Path) -> Result<Vec<Page>> {
        let pages = pdf_extract::extract_text_by_pages(file_path)
            .with_context(|| format!("Failed to read PDF file: {}", file_path.display()))?;

        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| Page::new(i as u32 + 1, text))
            .collect())
    }
}
