use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Facet name to the category terms assigned under it.
pub type Categories = BTreeMap<String, Vec<String>>;

/// One search hit as stored in `papers.json`. Fields this crate does not
/// interpret are carried through untouched in `extras`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PaperRecord {
    pub title: String,
    #[serde(default)]
    pub publication_date: Option<NaiveDate>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub selected: Option<bool>,
    #[serde(default)]
    pub categories: Option<Categories>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

impl PaperRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn year(&self) -> Option<i32> {
        self.publication_date.map(|date| date.year())
    }

    pub fn is_selected(&self) -> bool {
        self.selected.unwrap_or(false)
    }

    /// True when, for every facet in `filter`, the paper carries at least
    /// one of the listed terms. An empty filter matches everything.
    pub fn matches_categories(&self, filter: &Categories) -> bool {
        if filter.is_empty() {
            return true;
        }
        let Some(assigned) = self.categories.as_ref() else {
            return false;
        };
        filter.iter().all(|(facet, wanted)| {
            assigned
                .get(facet)
                .map(|terms| terms.iter().any(|term| wanted.contains(term)))
                .unwrap_or(false)
        })
    }

    /// Candidate download locations: listed URLs first, then the DOI
    /// resolver.
    pub fn download_urls(&self) -> Vec<String> {
        let mut urls = self.urls.clone();
        if let Some(doi) = self.doi.as_deref().map(str::trim).filter(|doi| !doi.is_empty()) {
            urls.push(format!("https://doi.org/{doi}"));
        }
        urls
    }
}

/// Root object of `papers.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PapersFile {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub since: Option<NaiveDate>,
    #[serde(default)]
    pub until: Option<NaiveDate>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub papers: Vec<PaperRecord>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}
