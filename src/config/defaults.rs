//! Default values and environment helpers for configuration

use std::env;

pub fn default_chunk_size() -> usize {
    900
}

pub fn default_chunk_overlap() -> usize {
    150
}

pub fn default_rag_top_k() -> usize {
    5
}

pub fn default_hybrid_candidates() -> usize {
    30
}

pub fn default_fusion_rrf_k() -> usize {
    60
}

pub fn default_rerank_top_n() -> usize {
    20
}

/// Read a string environment variable, falling back when unset or empty.
pub fn env_string(key: &str, fallback: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => fallback.to_string(),
    }
}

/// Read an integer environment variable, falling back on parse failure.
pub fn env_usize(key: &str, fallback: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

pub fn env_u64(key: &str, fallback: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

pub fn env_u32(key: &str, fallback: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

pub fn env_i64(key: &str, fallback: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

pub fn env_f64(key: &str, fallback: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

/// Read a boolean environment variable ("true"/"1"/"t" style values).
pub fn env_bool(key: &str, fallback: bool) -> bool {
    match env::var(key) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "t" | "true" | "yes" => true,
            "0" | "f" | "false" | "no" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}
