// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolError};

/// One retrieved chunk.
#[derive(Debug, Clone)]
pub struct DocumentHit {
    pub document_id: String,
    pub filename: String,
    pub snippet: String,
    pub score: f32,
}

/// Vector search over the caller's visible documents.  The runtime binds
/// this to the document store with the requesting user's scope applied.
#[async_trait]
pub trait DocumentSearcher: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<DocumentHit>, String>;
}

pub struct SearchDocumentsTool {
    searcher: Arc<dyn DocumentSearcher>,
    top_k: usize,
}

impl SearchDocumentsTool {
    pub fn new(searcher: Arc<dyn DocumentSearcher>) -> Self {
        Self { searcher, top_k: 5 }
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for passages relevant to a query. \
         Returns the best-matching document snippets."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("missing 'query' string".into()))?;

        let hits =
            self.searcher.search(query, self.top_k).await.map_err(ToolError::Execution)?;
        if hits.is_empty() {
            return Ok(json!("No matching documents found."));
        }
        let results: Vec<Value> = hits
            .iter()
            .map(|h| {
                json!({
                    "document_id": h.document_id,
                    "filename": h.filename,
                    "snippet": h.snippet,
                    "score": h.score,
                })
            })
            .collect();
        Ok(json!({ "results": results }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSearcher {
        hits: Vec<DocumentHit>,
    }

    #[async_trait]
    impl DocumentSearcher for StubSearcher {
        async fn search(&self, _query: &str, top_k: usize) -> Result<Vec<DocumentHit>, String> {
            Ok(self.hits.iter().take(top_k).cloned().collect())
        }
    }

    fn hit(id: &str) -> DocumentHit {
        DocumentHit {
            document_id: id.into(),
            filename: format!("{id}.pdf"),
            snippet: "relevant passage".into(),
            score: 0.9,
        }
    }

    #[tokio::test]
    async fn returns_structured_hits() {
        let tool = SearchDocumentsTool::new(Arc::new(StubSearcher { hits: vec![hit("doc-1")] }));
        let out = tool.execute(json!({"query": "refund policy"})).await.unwrap();
        assert_eq!(out["results"][0]["document_id"], "doc-1");
        assert_eq!(out["results"][0]["filename"], "doc-1.pdf");
    }

    #[tokio::test]
    async fn empty_results_have_readable_message() {
        let tool = SearchDocumentsTool::new(Arc::new(StubSearcher { hits: vec![] }));
        let out = tool.execute(json!({"query": "anything"})).await.unwrap();
        assert_eq!(out, json!("No matching documents found."));
    }

    #[tokio::test]
    async fn blank_query_is_invalid() {
        let tool = SearchDocumentsTool::new(Arc::new(StubSearcher { hits: vec![] }));
        let err = tool.execute(json!({"query": "   "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
