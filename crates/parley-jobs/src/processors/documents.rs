// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Document ingestion: chunk the extracted text, embed every chunk, store
//! the chunk rows, and flip the document to `ready`.
//!
//! Parsing/extraction happens before enqueue; this processor receives
//! plain text.  Chunk replacement is transactional, so a retried job
//! re-ingests cleanly.

use std::sync::Arc;

use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{info, warn};

use parley_store::{DocumentStore, NewChunk};

use crate::registry::{JobContext, JobError};

use super::WorkerServices;

const DEFAULT_CHUNK_CHARS: usize = 1000;

/// Split text into chunks of roughly `chunk_chars`, breaking on whitespace
/// so words stay intact.
pub fn chunk_text(text: &str, chunk_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > chunk_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub async fn process_document_ingest(
    payload: Value,
    ctx: JobContext,
    db: SqlitePool,
    services: Arc<WorkerServices>,
) -> Result<Value, JobError> {
    let document_id = payload["document_id"]
        .as_str()
        .ok_or_else(|| JobError::terminal("payload missing 'document_id'"))?;
    let content = payload["content"]
        .as_str()
        .ok_or_else(|| JobError::terminal("payload missing 'content'"))?;
    let chunk_chars = payload["chunk_chars"]
        .as_u64()
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_CHUNK_CHARS);

    let store = DocumentStore::new(&db);
    store.set_status(document_id, "processing", None, None).await?;

    let Some(embedder) = services.embedder.as_ref() else {
        let msg = "embeddings not configured";
        store.set_status(document_id, "failed", Some(msg), None).await?;
        return Err(JobError::terminal(msg));
    };

    let texts = chunk_text(content, chunk_chars);
    if texts.is_empty() {
        store.set_status(document_id, "failed", Some("document has no text"), None).await?;
        return Err(JobError::terminal("document has no text"));
    }

    let embeddings = match embedder.embed_many(&texts).await {
        Ok(v) => v,
        Err(e) => {
            let job_err: JobError = e.into();
            // Final attempt: record the failure on the document so it does
            // not sit in `processing` forever.
            if !job_err.retryable || ctx.attempt >= ctx.max_attempts {
                warn!(document_id, error = %job_err, "ingestion failed; marking document");
                store.set_status(document_id, "failed", Some(&job_err.message), None).await?;
            }
            return Err(job_err);
        }
    };

    let chunks: Vec<NewChunk> = texts
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (content, embedding))| NewChunk {
            chunk_index: i as i64,
            content,
            embedding,
        })
        .collect();
    let count = chunks.len() as i64;
    store.replace_chunks(document_id, &chunks).await?;
    store.set_status(document_id, "ready", None, Some(count)).await?;

    info!(document_id, chunks = count, "document ingested");
    Ok(json!({ "document_id": document_id, "chunk_count": count }))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_size_and_word_boundaries() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunk_text(text, 12);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 12, "chunk too long: {c:?}");
            assert!(!c.starts_with(' ') && !c.ends_with(' '));
        }
        // Nothing lost in the split.
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn single_short_text_is_one_chunk() {
        assert_eq!(chunk_text("tiny", 100), vec!["tiny".to_string()]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("   ", 100).is_empty());
    }

    #[test]
    fn oversized_word_still_lands_in_a_chunk() {
        let text = "supercalifragilisticexpialidocious tiny";
        let chunks = chunk_text(text, 10);
        assert_eq!(chunks[0], "supercalifragilisticexpialidocious");
        assert_eq!(chunks[1], "tiny");
    }
}
