//! Prompt construction for classification and answer generation

use crate::domain::RetrievedChunk;
use std::fmt::Write;

const MAX_CLASSIFICATION_SNIPPET: usize = 4000;

pub fn build_classification_prompt(text: &str) -> String {
    let snippet = truncate_on_char_boundary(text, MAX_CLASSIFICATION_SNIPPET);
    format!(
        "You are a document classifier.\n\
         Return strict JSON object with keys:\n\
         category (string), subcategory (string), tags (array of strings), \
         confidence (number from 0 to 1), summary (string).\n\
         No markdown, no extra keys.\n\n\
         Document:\n{snippet}"
    )
}

pub fn build_answer_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    for (idx, chunk) in chunks.iter().enumerate() {
        let _ = write!(
            context,
            "[{}] file={} category={} score={:.3}\n{}\n\n",
            idx + 1,
            chunk.filename,
            chunk.category,
            chunk.score,
            chunk.text
        );
    }

    format!(
        "Answer user question only from context below.\n\
         If context is insufficient, say it directly.\n\n\
         Question:\n{question}\n\n\
         Context:\n{context}"
    )
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
