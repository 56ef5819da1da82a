use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Turns a document's bytes into plain text for context retrieval.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_pdf(&self, bytes: Vec<u8>) -> Result<String>;
}

/// `pdf-extract` on the blocking pool. A parser panic on a malformed
/// document is reported as an error, not propagated.
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract_pdf(&self, bytes: Vec<u8>) -> Result<String> {
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| anyhow!("pdf extraction aborted: {e}"))?
            .map_err(|e| anyhow!("pdf extraction failed: {e}"))?;
        Ok(text.trim().to_owned())
    }
}
