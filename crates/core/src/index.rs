use tracing::debug;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{ExtractError, Result};
use crate::page::Page;

/// Pages of a single paper together with their vectors. Read-only once built.
pub struct EmbeddingIndex {
    pages: Vec<Page>,
    vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPage {
    pub page: Page,
    pub score: f32,
}

impl EmbeddingIndex {
    /// Only pages with text are sent to the provider; blank pages get a
    /// zero vector and therefore score 0 against any query.
    pub fn build(pages: Vec<Page>, embedder: &dyn Embedder) -> Result<Self> {
        let texts: Vec<String> = pages
            .iter()
            .filter(|page| !page.is_blank())
            .map(|page| page.text.clone())
            .collect();
        let embedded = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&texts)?
        };
        if embedded.len() != texts.len() {
            return Err(ExtractError::Embedding(format!(
                "provider returned {} vectors for {} pages",
                embedded.len(),
                texts.len()
            )));
        }
        let dims = embedded.first().map(Vec::len).unwrap_or(0);
        let mut embedded = embedded.into_iter();
        let vectors: Vec<Vec<f32>> = pages
            .iter()
            .map(|page| {
                if page.is_blank() {
                    vec![0.0; dims]
                } else {
                    embedded.next().unwrap_or_default()
                }
            })
            .collect();
        debug!(
            pages = pages.len(),
            blank = pages.len() - texts.len(),
            "built embedding index"
        );
        Ok(Self { pages, vectors })
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// The `k` pages closest to `text`, nearest first. `k` larger than the
    /// index is clamped; equal scores keep document order.
    pub fn query_scored(
        &self,
        text: &str,
        k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<ScoredPage>> {
        if k == 0 {
            return Err(ExtractError::Configuration(
                "similarity search needs k >= 1".to_string(),
            ));
        }
        if self.pages.is_empty() {
            return Ok(Vec::new());
        }
        let query = embedder.embed(text)?;
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(idx, vector)| (idx, cosine_similarity(&query, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k.min(self.pages.len()));
        Ok(scored
            .into_iter()
            .map(|(idx, score)| ScoredPage {
                page: self.pages[idx].clone(),
                score,
            })
            .collect())
    }

    pub fn query(&self, text: &str, k: usize, embedder: &dyn Embedder) -> Result<Vec<Page>> {
        Ok(self
            .query_scored(text, k, embedder)?
            .into_iter()
            .map(|hit| hit.page)
            .collect())
    }
}
