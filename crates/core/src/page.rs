use std::fs;
use std::io::ErrorKind;
use std::panic;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};

/// One physical page of a paper. `number` is 1-based and follows document
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Builds pages from raw strings, numbering them from 1.
pub fn pages_from_texts<I, S>(texts: I) -> Vec<Page>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    texts
        .into_iter()
        .enumerate()
        .map(|(idx, text)| Page::new(idx as u32 + 1, text))
        .collect()
}

/// Splits a PDF into its pages. Blank or scanned pages come back with empty
/// text.
pub fn load_pdf(path: &Path) -> Result<Vec<Page>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Err(ExtractError::Pdf(format!("{} is not a file", path.display()))),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ExtractError::NotFound(path.to_path_buf()))
        }
        Err(err) => return Err(ExtractError::Io(err)),
    }
    let texts = match extract_with_pdf_extract(path) {
        Ok(texts) => texts,
        Err(reason) => {
            warn!(path = %path.display(), "pdf-extract failed ({reason}), falling back to lopdf");
            extract_with_lopdf(path)?
        }
    };
    if texts.is_empty() {
        warn!(path = %path.display(), "pdf has no pages");
    }
    let pages = pages_from_texts(texts.iter().map(|text| sanitize(text)));
    debug!(path = %path.display(), pages = pages.len(), "loaded pdf");
    Ok(pages)
}

fn extract_with_pdf_extract(path: &Path) -> std::result::Result<Vec<String>, String> {
    // pdf-extract panics on some malformed inputs
    let outcome = panic::catch_unwind(|| pdf_extract::extract_text_by_pages(path));
    match outcome {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("extractor panicked".to_string()),
    }
}

fn extract_with_lopdf(path: &Path) -> Result<Vec<String>> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| ExtractError::Pdf(format!("failed to parse {}: {e}", path.display())))?;
    let mut texts = Vec::new();
    for page_number in doc.get_pages().keys() {
        let text = doc.extract_text(&[*page_number]).unwrap_or_else(|err| {
            debug!(page = page_number, "lopdf could not extract page text: {err}");
            String::new()
        });
        texts.push(text);
    }
    Ok(texts)
}

fn sanitize(text: &str) -> String {
    text.replace('\u{c}', " ")
}
