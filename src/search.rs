//! Waterfall search across all registered indexers.
//!
//! For each indexer, in priority order, query shapes are tried from most to
//! least specific until one returns anything. Shapes are never merged for a
//! single indexer, and one indexer's failure never stops the others.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::indexer::{Indexer, IndexerRegistry, SearchQuery, SearchResult};

/// One query shape in the waterfall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    /// Author and title combined.
    AuthorTitle,
    /// Title alone.
    Title,
    /// ISBN or external identifier alone.
    Identifier,
}

impl QueryShape {
    /// Shapes in the order they are tried.
    pub const WATERFALL: [QueryShape; 3] = [Self::AuthorTitle, Self::Title, Self::Identifier];

    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorTitle => "author_title",
            Self::Title => "title",
            Self::Identifier => "identifier",
        }
    }

    /// Builds this shape's query from the logical query.
    ///
    /// Returns `None` when the shape has nothing to search for. `AuthorTitle`
    /// additionally requires an author, since without one it would repeat the
    /// `Title` shape.
    #[must_use]
    pub fn build(&self, base: &SearchQuery) -> Option<SearchQuery> {
        let shaped = match self {
            Self::AuthorTitle => {
                base.author()?;
                SearchQuery {
                    title: base.title.trim().to_string(),
                    author: base.author.clone(),
                    isbn: None,
                    external_id: None,
                    media_type: base.media_type,
                }
            }
            Self::Title => SearchQuery::new(base.title.trim(), base.media_type),
            Self::Identifier => SearchQuery {
                title: String::new(),
                author: None,
                isbn: base.isbn.clone(),
                external_id: base.external_id.clone(),
                media_type: base.media_type,
            },
        };
        (!shaped.is_empty()).then_some(shaped)
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives the waterfall strategy over an [`IndexerRegistry`].
#[derive(Debug, Clone)]
pub struct SearchOrchestrator {
    registry: Arc<IndexerRegistry>,
}

impl SearchOrchestrator {
    /// Creates an orchestrator over `registry`.
    #[must_use]
    pub fn new(registry: Arc<IndexerRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<IndexerRegistry> {
        &self.registry
    }

    /// Runs the waterfall over every indexer and concatenates what each found.
    ///
    /// Results are unscored and ordered by indexer priority.
    #[tracing::instrument(
        skip(self, query),
        fields(title = %query.title, media_type = %query.media_type)
    )]
    pub async fn search(&self, query: &SearchQuery) -> Vec<SearchResult> {
        let mut aggregate = Vec::new();
        for indexer in self.registry.ordered() {
            let found = search_one(indexer.as_ref(), query).await;
            aggregate.extend(found);
        }
        info!(total = aggregate.len(), indexers = self.registry.len(), "Waterfall search finished");
        aggregate
    }
}

/// Runs the waterfall against a single indexer.
///
/// Returns the first non-empty shape's results, or nothing when every shape
/// is empty, skipped, or failed.
pub async fn search_one(indexer: &dyn Indexer, query: &SearchQuery) -> Vec<SearchResult> {
    for shape in QueryShape::WATERFALL {
        let Some(shaped) = shape.build(query) else {
            debug!(indexer = indexer.name(), shape = %shape, "Skipping empty query shape");
            continue;
        };

        match indexer.search(&shaped).await {
            Ok(results) if !results.is_empty() => {
                debug!(
                    indexer = indexer.name(),
                    shape = %shape,
                    count = results.len(),
                    "Query shape produced results"
                );
                return results;
            }
            Ok(_) => {
                debug!(indexer = indexer.name(), shape = %shape, "Query shape returned nothing");
            }
            Err(error) => {
                warn!(
                    indexer = indexer.name(),
                    shape = %shape,
                    kind = ?error.kind(),
                    error = %error,
                    "Indexer search failed, trying next shape"
                );
            }
        }
    }
    Vec::new()
}
