//! `document_search` provider backed by the retrieval collaborator.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RetrievalConfig;
use crate::retrieval::{fetch_context, Retriever};

use super::types::{ToolProvider, UserContext};

/// Serves `document_search` calls when the model searches documents itself
/// (tool mode). In retrieval-augmented mode the tool is not offered.
pub struct DocumentSearchProvider {
    retriever: Arc<dyn Retriever>,
    config: RetrievalConfig,
}

impl DocumentSearchProvider {
    pub fn new(retriever: Arc<dyn Retriever>, config: RetrievalConfig) -> Self {
        Self { retriever, config }
    }
}

#[async_trait]
impl ToolProvider for DocumentSearchProvider {
    async fn call(
        &self,
        ctx: &UserContext,
        arguments: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let query = arguments
            .get("query")
            .and_then(|q| q.as_str())
            .ok_or_else(|| anyhow::anyhow!("document_search requires a 'query' string"))?;

        let hits = fetch_context(self.retriever.as_ref(), ctx, query, &self.config).await?;
        Ok(serde_json::json!({ "results": hits }))
    }
}
