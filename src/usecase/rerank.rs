//! Lexical-overlap rerank of the fused head
//!
//! Re-scores the top of the fused list by combining the min-max-normalised
//! fused score with query-token overlap and a filename hit. The tail past
//! `top_n` keeps its fusion order.

use super::fusion::compare_fused;
use crate::domain::RetrievedChunk;
use std::collections::HashSet;

const FUSED_WEIGHT: f64 = 0.60;
const OVERLAP_WEIGHT: f64 = 0.30;
const FILENAME_WEIGHT: f64 = 0.10;

pub(crate) fn rerank_hybrid_candidates(
    question: &str,
    fused: Vec<RetrievedChunk>,
    top_n: usize,
) -> Vec<RetrievedChunk> {
    if fused.is_empty() {
        return fused;
    }
    let top_n = if top_n == 0 || top_n > fused.len() {
        fused.len()
    } else {
        top_n
    };

    let mut fused = fused;
    let tail = fused.split_off(top_n);
    let mut head = fused;

    let query_tokens = token_set(question);

    let min_score = head
        .iter()
        .map(|c| c.score)
        .fold(f64::INFINITY, f64::min);
    let max_score = head
        .iter()
        .map(|c| c.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let range = max_score - min_score;

    for chunk in &mut head {
        let normalized = if range <= 0.0 {
            if chunk.score > 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            (chunk.score - min_score) / range
        };
        let overlap = token_overlap(&query_tokens, &token_set(&chunk.text));
        let filename_boost = filename_token_hit(&query_tokens, &chunk.filename);
        chunk.score =
            FUSED_WEIGHT * normalized + OVERLAP_WEIGHT * overlap + FILENAME_WEIGHT * filename_boost;
    }

    head.sort_by(compare_fused);
    head.extend(tail);
    head
}

fn token_overlap(query: &HashSet<String>, chunk: &HashSet<String>) -> f64 {
    if query.is_empty() || chunk.is_empty() {
        return 0.0;
    }
    let matches = query.iter().filter(|token| chunk.contains(*token)).count();
    matches as f64 / query.len() as f64
}

fn filename_token_hit(query: &HashSet<String>, filename: &str) -> f64 {
    if query.is_empty() || filename.is_empty() {
        return 0.0;
    }
    let filename = filename.to_lowercase();
    for token in query {
        if !token.is_empty() && filename.contains(token.as_str()) {
            return 1.0;
        }
    }
    0.0
}

fn token_set(s: &str) -> HashSet<String> {
    split_alphanum_lower(s).into_iter().collect()
}

fn split_alphanum_lower(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    let mut tokens = Vec::with_capacity(16);
    let mut current = String::new();
    for r in s.chars() {
        let r = r.to_ascii_lowercase();
        if r.is_ascii_lowercase() || r.is_ascii_digit() {
            current.push(r);
            continue;
        }
        if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
