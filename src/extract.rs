//! Text extraction for source documents.
//!
//! The loader hands over raw bytes plus the file extension; this module
//! returns plain UTF-8 text. PDF goes through `pdf-extract`, plain text and
//! markdown are decoded lossily so a stray invalid byte never aborts a run.

use thiserror::Error;

/// Extraction failure. Never panics; the caller decides what to do with it.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document extension: {0}")]
    UnsupportedExtension(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Extracts plain text from a document's bytes, dispatching on its extension.
///
/// The extension comparison is case-insensitive and expects no leading dot.
pub fn extract_text(bytes: &[u8], extension: &str) -> Result<String, ExtractError> {
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => extract_pdf(bytes),
        "txt" | "md" | "markdown" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(ExtractError::UnsupportedExtension(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}
