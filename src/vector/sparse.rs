//! Hashed sparse vectors for lexical search
//!
//! Tokens hash into a fixed 32-bit index space; weights follow BM25-style
//! term-frequency saturation. IDF weighting happens in the sparse index
//! itself, so the encoder stays corpus-free and fully deterministic.

const DOC_BM25_K1: f64 = 1.2;
const QUERY_BM25_K: f64 = 1.2;
const FILENAME_BOOST: f64 = 1.5;
const MAX_SPARSE_TERMS: usize = 256;

/// A sparse vector with strictly ascending indices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Encode chunk text for indexing; the filename folds in with extra weight
/// so file-name terms stay searchable.
pub fn encode_sparse_document(text: &str, filename: &str) -> SparseVector {
    let mut term_freq = std::collections::HashMap::with_capacity(64);
    append_term_freq(&mut term_freq, tokenize_alphanum(text), 1.0);
    append_term_freq(&mut term_freq, tokenize_alphanum(filename), FILENAME_BOOST);
    term_freq_to_sparse(&term_freq, DOC_BM25_K1)
}

/// Encode a query. An empty result means the lexical branch is skipped.
pub fn encode_sparse_query(query: &str) -> SparseVector {
    let mut term_freq = std::collections::HashMap::with_capacity(32);
    append_term_freq(&mut term_freq, tokenize_alphanum(query), 1.0);
    term_freq_to_sparse(&term_freq, QUERY_BM25_K)
}

fn append_term_freq(
    dst: &mut std::collections::HashMap<u32, f64>,
    tokens: Vec<String>,
    token_weight: f64,
) {
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        *dst.entry(hash_token(&token)).or_insert(0.0) += token_weight;
    }
}

fn term_freq_to_sparse(tf: &std::collections::HashMap<u32, f64>, k: f64) -> SparseVector {
    if tf.is_empty() {
        return SparseVector::default();
    }
    let mut indices: Vec<u32> = tf.keys().copied().collect();
    indices.sort_unstable();
    indices.truncate(MAX_SPARSE_TERMS);

    let values = indices
        .iter()
        .map(|idx| {
            let tf_value = tf[idx];
            let weight = (tf_value * (k + 1.0)) / (tf_value + k);
            if weight.is_nan() || weight.is_infinite() {
                0.0
            } else {
                weight as f32
            }
        })
        .collect();

    SparseVector { indices, values }
}

/// FNV-1a over the token bytes; zero remaps to one because index 0 is
/// reserved at the backend.
fn hash_token(token: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in token.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    if hash == 0 {
        1
    } else {
        hash
    }
}

/// Lowercase and split on runs of ASCII alphanumerics. Non-ASCII
/// characters act as separators.
pub fn tokenize_alphanum(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(24);
    let mut current = String::new();
    for r in s.chars() {
        let r = r.to_ascii_lowercase();
        if r.is_ascii_lowercase() || r.is_ascii_digit() {
            current.push(r);
            continue;
        }
        if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
