//! Reciprocal-rank fusion of semantic and lexical candidates

use crate::domain::RetrievedChunk;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Fuse two ranked candidate lists with RRF. Candidates sharing a fusion
/// key accumulate score from both lists and keep the richer metadata.
pub(crate) fn fuse_candidates_rrf(
    semantic: Vec<RetrievedChunk>,
    lexical: Vec<RetrievedChunk>,
    rrf_k: usize,
) -> Vec<RetrievedChunk> {
    let rrf_k = if rrf_k == 0 { 60 } else { rrf_k };

    let mut acc: HashMap<String, (RetrievedChunk, f64)> =
        HashMap::with_capacity(semantic.len() + lexical.len());

    let mut add_list = |chunks: Vec<RetrievedChunk>| {
        for (rank, chunk) in chunks.into_iter().enumerate() {
            let key = chunk_key(&chunk);
            let contribution = 1.0 / (rrf_k + rank + 1) as f64;
            match acc.entry(key) {
                Entry::Occupied(mut e) => {
                    let (existing, score) = e.get_mut();
                    merge_richer(existing, chunk);
                    *score += contribution;
                }
                Entry::Vacant(e) => {
                    e.insert((chunk, contribution));
                }
            }
        }
    };

    add_list(semantic);
    add_list(lexical);

    let mut out: Vec<RetrievedChunk> = acc
        .into_values()
        .map(|(mut chunk, score)| {
            chunk.score = score;
            chunk
        })
        .collect();

    out.sort_by(compare_fused);
    out
}

/// Score descending, then a stable deterministic tie-break.
pub(crate) fn compare_fused(a: &RetrievedChunk, b: &RetrievedChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        .then_with(|| a.filename.cmp(&b.filename))
}

pub(crate) fn trim_candidates(mut chunks: Vec<RetrievedChunk>, limit: usize) -> Vec<RetrievedChunk> {
    if limit > 0 && chunks.len() > limit {
        chunks.truncate(limit);
    }
    chunks
}

/// Canonical fusion key: (document_id, chunk_index) when both are known,
/// otherwise the identifying text fields.
fn chunk_key(chunk: &RetrievedChunk) -> String {
    if !chunk.document_id.is_empty() && chunk.chunk_index >= 0 {
        format!("{}:{}", chunk.document_id, chunk.chunk_index)
    } else {
        format!("{}|{}|{}", chunk.document_id, chunk.filename, chunk.text)
    }
}

/// Fill empty metadata fields from the other list's version of the chunk.
fn merge_richer(current: &mut RetrievedChunk, candidate: RetrievedChunk) {
    if current.document_id.is_empty() && current.filename.is_empty() && current.text.is_empty() {
        *current = candidate;
        return;
    }
    if current.text.is_empty() && !candidate.text.is_empty() {
        current.text = candidate.text;
    }
    if current.filename.is_empty() && !candidate.filename.is_empty() {
        current.filename = candidate.filename;
    }
    if current.category.is_empty() && !candidate.category.is_empty() {
        current.category = candidate.category;
    }
    if current.document_id.is_empty() && !candidate.document_id.is_empty() {
        current.document_id = candidate.document_id;
    }
    if current.chunk_index < 0 && candidate.chunk_index >= 0 {
        current.chunk_index = candidate.chunk_index;
    }
}
