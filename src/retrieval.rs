//! Retrieval collaborator: similarity search over the user's documents.
//!
//! The vector index itself lives outside the crate; this module owns the
//! top-K context policy and the text injected as grounding context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::tools::types::UserContext;

/// One scored chunk from the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub content: String,
    /// File the chunk came from.
    pub source_id: String,
    pub score: f32,
}

/// Scored similarity search scoped to one user.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `limit` hits for `query`, best first.
    ///
    /// `source_filter` narrows results to the given documents; implementations
    /// may apply it server-side or leave it to `fetch_context`.
    async fn search(
        &self,
        ctx: &UserContext,
        query: &str,
        source_filter: Option<&[String]>,
        limit: usize,
    ) -> anyhow::Result<Vec<RetrievalHit>>;
}

/// Fetch the top-K context set for `query`.
///
/// Requests `candidate_pool` hits, drops any outside the active sources,
/// orders by score and keeps `top_k`.
pub async fn fetch_context(
    retriever: &dyn Retriever,
    ctx: &UserContext,
    query: &str,
    config: &RetrievalConfig,
) -> anyhow::Result<Vec<RetrievalHit>> {
    let filter = ctx.active_sources.as_deref();
    let mut hits = retriever
        .search(ctx, query, filter, config.candidate_pool)
        .await?;

    let fetched = hits.len();
    if let Some(sources) = filter {
        hits.retain(|h| sources.iter().any(|s| s == &h.source_id));
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(config.top_k);

    tracing::debug!(
        user = %ctx.user_id,
        fetched,
        kept = hits.len(),
        "retrieval context fetched"
    );
    Ok(hits)
}

/// Render hits as the grounding context message body.
pub fn format_context(query: &str, hits: &[RetrievalHit]) -> String {
    if hits.is_empty() {
        return format!(
            "CONTEXT FROM USER DOCUMENTS: No relevant documents found using query \"{query}\"."
        );
    }

    let blocks = hits
        .iter()
        .map(|h| format!("[Source: {}]\n{}", h.source_id, h.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "CONTEXT FROM USER DOCUMENTS:\n{blocks}\n\n\
         INSTRUCTION: Answer the user's question using ONLY the context above. \
         If the answer is not in the context, say you don't know."
    )
}
