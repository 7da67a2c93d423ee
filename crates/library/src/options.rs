use std::time::Duration;

use chrono::NaiveDate;

use crate::error::{LibraryError, Result};
use crate::model::Categories;

pub const KNOWN_DATABASES: [&str; 7] = [
    "acm", "arxiv", "biorxiv", "ieee", "medrxiv", "pubmed", "scopus",
];

pub const PUBLICATION_TYPES: [&str; 4] = ["journal", "conference proceedings", "book", "other"];

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters of a literature search. Database and publication type names
/// are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    pub query: String,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub limit: Option<usize>,
    pub limit_per_database: Option<usize>,
    pub databases: Vec<String>,
    pub publication_types: Vec<String>,
    pub proxy: Option<String>,
}

impl SearchOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(LibraryError::InvalidOption(
                "search query must not be empty".to_string(),
            ));
        }
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(LibraryError::InvalidOption(format!(
                    "since ({since}) is after until ({until})"
                )));
            }
        }
        check_names("database", &self.databases, &KNOWN_DATABASES)?;
        check_names(
            "publication type",
            &self.publication_types,
            &PUBLICATION_TYPES,
        )?;
        Ok(())
    }
}

fn check_names(kind: &str, values: &[String], known: &[&str]) -> Result<()> {
    for value in values {
        let normalized = value.trim().to_lowercase();
        if !known.contains(&normalized.as_str()) {
            return Err(LibraryError::InvalidOption(format!(
                "unknown {kind} '{value}', expected one of {}",
                known.join(", ")
            )));
        }
    }
    Ok(())
}

/// Which papers to fetch and how.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    pub only_selected: bool,
    pub categories: Categories,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            only_selected: false,
            categories: Categories::new(),
            proxy: None,
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

/// Parses `"Facet:term_a,term_b"` into the facet and its terms.
pub fn parse_category_filter(raw: &str) -> Result<(String, Vec<String>)> {
    let (facet, terms) = raw.split_once(':').ok_or_else(|| {
        LibraryError::InvalidOption(format!(
            "category filter '{raw}' must look like <facet>:<term_a>,<term_b>"
        ))
    })?;
    let facet = facet.trim();
    if facet.is_empty() {
        return Err(LibraryError::InvalidOption(format!(
            "category filter '{raw}' has no facet"
        )));
    }
    let terms: Vec<String> = terms
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect();
    if terms.is_empty() {
        return Err(LibraryError::InvalidOption(format!(
            "category filter '{raw}' lists no terms"
        )));
    }
    Ok((facet.to_string(), terms))
}

/// Folds repeated `--categories` arguments into one filter. Terms for a
/// facet given twice are merged.
pub fn parse_category_filters<S: AsRef<str>>(raw: &[S]) -> Result<Categories> {
    let mut filter = Categories::new();
    for entry in raw {
        let (facet, terms) = parse_category_filter(entry.as_ref())?;
        let slot = filter.entry(facet).or_default();
        for term in terms {
            if !slot.contains(&term) {
                slot.push(term);
            }
        }
    }
    Ok(filter)
}
