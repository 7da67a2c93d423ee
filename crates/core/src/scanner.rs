use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::Result;
use crate::page::{load_pdf, Page};
use crate::reader::{ExtractedValue, ValueReader};

/// Where a scanner gets its pages from.
#[derive(Debug, Clone)]
pub enum PagesSource {
    FromFile(PathBuf),
    FromList { paper: String, pages: Vec<Page> },
}

/// Runs a [`ValueReader`] over every page of one paper and reconciles the
/// answers.
#[derive(Debug, Clone)]
pub struct PageScanner {
    paper: String,
    pages: Vec<Page>,
}

impl PageScanner {
    pub fn new(source: PagesSource) -> Result<Self> {
        match source {
            PagesSource::FromFile(path) => {
                let pages = load_pdf(&path)?;
                Ok(Self {
                    paper: path.display().to_string(),
                    pages,
                })
            }
            PagesSource::FromList { paper, pages } => Ok(Self::from_pages(paper, pages)),
        }
    }

    /// Skips PDF loading; used when pages were already narrowed down.
    pub fn from_pages(paper: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            paper: paper.into(),
            pages,
        }
    }

    pub fn paper(&self) -> &str {
        &self.paper
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Distinct values found across the pages, sorted lexicographically.
    /// More than one value is logged as an ambiguity and returned as is.
    pub fn scan(&self, reader: &ValueReader) -> Result<Vec<String>> {
        let mut values = BTreeSet::new();
        for page in &self.pages {
            match reader.read(&page.text)? {
                ExtractedValue::Found(value) => {
                    debug!(paper = %self.paper, page = page.number, %value, "value found");
                    values.insert(value);
                }
                ExtractedValue::NotFound => {
                    debug!(paper = %self.paper, page = page.number, "no value on page");
                }
            }
        }
        let values: Vec<String> = values.into_iter().collect();
        if values.len() > 1 {
            warn!(
                target_quantity = reader.target(),
                paper = %self.paper,
                values = ?values,
                "found multiple values for the target"
            );
        }
        Ok(values)
    }
}
