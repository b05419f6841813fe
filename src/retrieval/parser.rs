use async_trait::async_trait;
use tracing::debug;

use super::models::{IngestFile, ParsedDocument};
use crate::{RagError, Result};

/// Characters assumed per page when the text carries no page breaks
const CHARS_PER_PAGE: usize = 3000;
const FORM_FEED: char = '\u{000C}';

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "json", "log"];

/// Turns uploaded bytes into text the chunker can work with
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, file: &IngestFile) -> Result<ParsedDocument>;

    /// Whether `parse` would accept this file
    fn supports(&self, file: &IngestFile) -> bool;
}

/// Accepts plain-text formats only; binary office formats are rejected
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextParser;

#[async_trait]
impl DocumentParser for PlainTextParser {
    async fn parse(&self, file: &IngestFile) -> Result<ParsedDocument> {
        if !self.supports(file) {
            let kind = file
                .mime_type
                .clone()
                .or_else(|| file.extension())
                .unwrap_or_else(|| file.name.clone());
            return Err(RagError::UnsupportedFileType(kind));
        }

        let content = String::from_utf8_lossy(&file.bytes).into_owned();
        let page_count = estimate_page_count(&content);
        debug!(
            "Parsed {} ({} bytes, ~{} pages)",
            file.name,
            file.bytes.len(),
            page_count
        );

        Ok(ParsedDocument {
            content,
            page_count,
        })
    }

    fn supports(&self, file: &IngestFile) -> bool {
        match file.extension() {
            Some(ext) if TEXT_EXTENSIONS.contains(&ext.as_str()) => true,
            _ => file
                .mime_type
                .as_deref()
                .is_some_and(|mime| mime.trim().to_lowercase().starts_with("text/")),
        }
    }
}

/// Form-feed separated pages if present, otherwise a length-based guess
#[inline]
pub fn estimate_page_count(content: &str) -> usize {
    let form_feeds = content.chars().filter(|&c| c == FORM_FEED).count();
    if form_feeds > 0 {
        form_feeds
    } else {
        content.chars().count().div_ceil(CHARS_PER_PAGE).max(1)
    }
}
