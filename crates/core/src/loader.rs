use crate::error::{IngestError, Result};
use crate::models::{DocumentFingerprint, PageRecord};
use chrono::Utc;
use lopdf::Document;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Turns one file on disk into ordered page records.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Vec<PageRecord>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn load(&self, path: &Path) -> Result<Vec<PageRecord>> {
        let fingerprint = fingerprint(path)?;
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let total_pages = page_numbers.len() as u32;

        let mut pages = Vec::new();
        for page_no in page_numbers {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                let metadata = fingerprint.page_metadata(page_no.saturating_sub(1), total_pages);
                pages.push(PageRecord::new(text, metadata));
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

/// Loads UTF-8 text files as a single page.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn load(&self, path: &Path) -> Result<Vec<PageRecord>> {
        let fingerprint = fingerprint(path)?;
        let text = fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "document is empty: {}",
                path.display()
            )));
        }
        Ok(vec![PageRecord::new(text, fingerprint.page_metadata(0, 1))])
    }
}

/// Picks a loader from the file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoLoader;

impl DocumentLoader for AutoLoader {
    fn load(&self, path: &Path) -> Result<Vec<PageRecord>> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => PdfLoader.load(path),
            "txt" | "md" | "text" => TextLoader.load(path),
            other => Err(IngestError::UnsupportedDocument(format!(
                "{} (extension `{other}`)",
                path.display()
            ))),
        }
    }
}

pub fn digest_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn fingerprint(path: &Path) -> Result<DocumentFingerprint> {
    let checksum = digest_file(path)?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::InvalidArgument(format!("path has no file name: {}", path.display()))
        })?;

    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(checksum.as_bytes());

    Ok(DocumentFingerprint {
        document_id: format!("{:x}", hasher.finalize()),
        document_title: name.to_string(),
        source_path: path.to_string_lossy().to_string(),
        checksum,
        ingested_at: Utc::now(),
    })
}
