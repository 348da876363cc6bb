//! PDF text extraction for the open-source scan.
//!
//! PDFs are fetched into a temporary file and handed to `pdf-extract` on a
//! blocking thread. The temporary file is removed once extraction finishes.

use anyhow::Context;
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching or reading a PDF
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("PDF download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("PDF download returned {0}")]
    Status(StatusCode),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to extract text from PDF: {0}")]
    Extract(String),
}

/// Source of full PDF text for a paper.
pub trait PdfTextSource {
    async fn fetch_text(&self, pdf_url: &str) -> Result<String, ScanError>;
}

pub struct PdfScanner {
    client: Client,
}

impl PdfScanner {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl PdfTextSource for PdfScanner {
    async fn fetch_text(&self, pdf_url: &str) -> Result<String, ScanError> {
        tracing::debug!("Fetching PDF for text scan: {}", pdf_url);
        let resp = self.client.get(pdf_url).send().await?;
        if !resp.status().is_success() {
            return Err(ScanError::Status(resp.status()));
        }
        let bytes = resp.bytes().await?;

        let tmp = tempfile::Builder::new()
            .prefix("arxiv-sieve-")
            .suffix(".pdf")
            .tempfile()?;
        tokio::fs::write(tmp.path(), &bytes).await?;

        extract_text(tmp.path()).await
    }
}

/// Extract the text of a local PDF.
///
/// The extractor can panic on malformed files; that is reported as an
/// extraction failure like any other.
pub async fn extract_text(path: &Path) -> Result<String, ScanError> {
    let path = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
        .await
        .map_err(|e| ScanError::Extract(format!("extractor aborted: {}", e)))?
        .map_err(|e| ScanError::Extract(e.to_string()))?;

    if text.trim().is_empty() {
        // Scanned or image-only PDFs come back empty
        tracing::debug!("Extracted empty text from PDF");
    }
    Ok(text)
}
