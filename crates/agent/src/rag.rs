use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use leadflow_core::domain::lead::ExtractedData;
use leadflow_core::knowledge::document::META_BRAND;
use leadflow_core::knowledge::{KnowledgeStore, RagDocument, SearchQuery};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One retrieved snippet, in the order the store ranked it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RagHit {
    pub document_id: String,
    pub excerpt: String,
    pub metadata: BTreeMap<String, Value>,
}

impl From<&RagDocument> for RagHit {
    fn from(document: &RagDocument) -> Self {
        Self {
            document_id: document.id.clone(),
            excerpt: document.content.clone(),
            metadata: document.metadata.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TechnicalQuery {
    pub implement: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
}

impl TechnicalQuery {
    pub fn from_data(data: &ExtractedData) -> Self {
        Self {
            implement: data.implement_of_interest.clone(),
            brand: data.machine.brand.clone(),
            model: data.machine.model.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.implement.is_none() && self.brand.is_none() && self.model.is_none()
    }

    pub fn text(&self) -> String {
        [&self.implement, &self.brand, &self.model]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RagError {
    #[error("knowledge source unavailable: {0}")]
    Unavailable(String),
    #[error("knowledge query timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

/// Best-effort retrieval. An empty result is not an error.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn search(&self, text: &str, top_k: usize) -> Result<Vec<RagHit>, RagError>;

    async fn query(&self, query: &TechnicalQuery, top_k: usize) -> Result<Vec<RagHit>, RagError>;
}

/// Searches the in-process knowledge snapshot.
#[derive(Clone, Debug)]
pub struct LocalKnowledgeSource {
    store: Arc<KnowledgeStore>,
}

impl LocalKnowledgeSource {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }
}

#[async_trait]
impl KnowledgeSource for LocalKnowledgeSource {
    async fn search(&self, text: &str, top_k: usize) -> Result<Vec<RagHit>, RagError> {
        let snapshot = self.store.snapshot();
        Ok(snapshot.search(&SearchQuery::new(text, top_k)).into_iter().map(RagHit::from).collect())
    }

    async fn query(&self, query: &TechnicalQuery, top_k: usize) -> Result<Vec<RagHit>, RagError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut search = SearchQuery::new(query.text(), top_k);
        if let Some(brand) = &query.brand {
            search = search.filter(META_BRAND, brand.clone());
        }

        let snapshot = self.store.snapshot();
        Ok(snapshot.search(&search).into_iter().map(RagHit::from).collect())
    }
}
