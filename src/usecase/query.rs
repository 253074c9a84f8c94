//! Question answering over the document index
//!
//! Dispatches on the configured retrieval mode, fuses hybrid candidates,
//! optionally reranks, and asks the generator for a grounded answer.

use super::fusion::{fuse_candidates_rrf, trim_candidates};
use super::rerank::rerank_hybrid_candidates;
use crate::domain::{Answer, RetrievalMeta, RetrievalMode, RetrievedChunk, SearchFilter};
use crate::error::{Error, Result};
use crate::ports::{AnswerGenerator, Embedder, QueryService, VectorStore};
use std::sync::Arc;

/// Tuning options for the query use case
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub retrieval_mode: RetrievalMode,
    pub hybrid_candidates: usize,
    pub fusion_rrf_k: usize,
    pub rerank_top_n: usize,
}

pub struct QueryUseCase {
    embedder: Arc<dyn Embedder>,
    vector_db: Arc<dyn VectorStore>,
    generator: Arc<dyn AnswerGenerator>,
    retrieval_mode: RetrievalMode,
    hybrid_candidates: usize,
    fusion_rrf_k: usize,
    rerank_top_n: usize,
}

impl QueryUseCase {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_db: Arc<dyn VectorStore>,
        generator: Arc<dyn AnswerGenerator>,
        options: QueryOptions,
    ) -> Self {
        Self {
            embedder,
            vector_db,
            generator,
            retrieval_mode: options.retrieval_mode,
            hybrid_candidates: if options.hybrid_candidates == 0 {
                30
            } else {
                options.hybrid_candidates
            },
            fusion_rrf_k: if options.fusion_rrf_k == 0 {
                60
            } else {
                options.fusion_rrf_k
            },
            rerank_top_n: if options.rerank_top_n == 0 {
                20
            } else {
                options.rerank_top_n
            },
        }
    }

    async fn retrieve_chunks(
        &self,
        question: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<(Vec<RetrievedChunk>, RetrievalMeta)> {
        match self.retrieval_mode {
            RetrievalMode::Semantic => self.search_semantic(question, limit, filter).await,
            RetrievalMode::Hybrid | RetrievalMode::HybridRerank => {
                let candidate_limit = self.hybrid_candidates.max(limit);

                let query_vector = self.embedder.embed_query(question).await?;
                let semantic = self
                    .vector_db
                    .search(&query_vector, candidate_limit, filter)
                    .await?;
                let lexical = self
                    .vector_db
                    .search_lexical(question, candidate_limit, filter)
                    .await?;

                let semantic_candidates = semantic.len();
                let lexical_candidates = lexical.len();

                let mut fused = fuse_candidates_rrf(semantic, lexical, self.fusion_rrf_k);
                let rerank_applied = self.retrieval_mode == RetrievalMode::HybridRerank;
                if rerank_applied && !fused.is_empty() {
                    fused = rerank_hybrid_candidates(question, fused, self.rerank_top_n);
                }

                Ok((
                    trim_candidates(fused, limit),
                    RetrievalMeta {
                        mode: self.retrieval_mode,
                        semantic_candidates,
                        lexical_candidates,
                        rerank_applied,
                    },
                ))
            }
        }
    }

    async fn search_semantic(
        &self,
        question: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<(Vec<RetrievedChunk>, RetrievalMeta)> {
        let query_vector = self.embedder.embed_query(question).await?;
        let chunks = self.vector_db.search(&query_vector, limit, filter).await?;
        let meta = RetrievalMeta {
            mode: RetrievalMode::Semantic,
            semantic_candidates: chunks.len(),
            lexical_candidates: 0,
            rerank_applied: false,
        };
        Ok((chunks, meta))
    }
}

#[async_trait::async_trait]
impl QueryService for QueryUseCase {
    async fn answer(&self, question: &str, limit: i64, filter: &SearchFilter) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::invalid_input("answer", "question is required"));
        }
        let limit = if limit <= 0 { 5 } else { limit as usize };

        let (chunks, meta) = self.retrieve_chunks(question, limit, filter).await?;
        let text = self.generator.generate_answer(question, &chunks).await?;

        Ok(Answer {
            text,
            sources: chunks,
            retrieval: meta,
        })
    }

    async fn generate_from_prompt(&self, prompt: &str) -> Result<String> {
        self.generator.generate_from_prompt(prompt).await
    }

    async fn generate_json_from_prompt(&self, prompt: &str) -> Result<String> {
        self.generator.generate_json_from_prompt(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Document;
    use std::sync::Mutex;

    struct StubEmbedder;

    #[async_trait::async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2]).collect())
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.2])
        }
    }

    #[derive(Default)]
    struct RecordingVectorStore {
        search_calls: Mutex<Vec<usize>>,
        lexical_calls: Mutex<Vec<usize>>,
        semantic_results: Vec<RetrievedChunk>,
        lexical_results: Vec<RetrievedChunk>,
    }

    #[async_trait::async_trait]
    impl VectorStore for RecordingVectorStore {
        async fn index_chunks(
            &self,
            _doc: &Document,
            _chunks: &[String],
            _vectors: &[Vec<f32>],
        ) -> Result<()> {
            Ok(())
        }

        async fn search(
            &self,
            _query_vector: &[f32],
            limit: usize,
            _filter: &SearchFilter,
        ) -> Result<Vec<RetrievedChunk>> {
            self.search_calls.lock().unwrap().push(limit);
            Ok(self.semantic_results.clone())
        }

        async fn search_lexical(
            &self,
            _query_text: &str,
            limit: usize,
            _filter: &SearchFilter,
        ) -> Result<Vec<RetrievedChunk>> {
            self.lexical_calls.lock().unwrap().push(limit);
            Ok(self.lexical_results.clone())
        }
    }

    struct EchoGenerator;

    #[async_trait::async_trait]
    impl AnswerGenerator for EchoGenerator {
        async fn generate_answer(
            &self,
            _question: &str,
            _chunks: &[RetrievedChunk],
        ) -> Result<String> {
            Ok("generated".to_string())
        }

        async fn generate_from_prompt(&self, _prompt: &str) -> Result<String> {
            Ok("from prompt".to_string())
        }

        async fn generate_json_from_prompt(&self, _prompt: &str) -> Result<String> {
            Ok("{}".to_string())
        }
    }

    fn chunk(doc: &str, text: &str, score: f64) -> RetrievedChunk {
        RetrievedChunk {
            document_id: doc.to_string(),
            filename: format!("{doc}.txt"),
            category: String::new(),
            chunk_index: 0,
            text: text.to_string(),
            score,
        }
    }

    fn use_case(store: Arc<RecordingVectorStore>, mode: RetrievalMode) -> QueryUseCase {
        QueryUseCase::new(
            Arc::new(StubEmbedder),
            store,
            Arc::new(EchoGenerator),
            QueryOptions {
                retrieval_mode: mode,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_semantic_mode_searches_dense_only() {
        let store = Arc::new(RecordingVectorStore {
            semantic_results: vec![chunk("doc-1", "hello", 0.9)],
            ..Default::default()
        });
        let uc = use_case(store.clone(), RetrievalMode::Semantic);

        let answer = uc.answer("q", 0, &SearchFilter::default()).await.unwrap();

        assert_eq!(store.search_calls.lock().unwrap().as_slice(), &[5]);
        assert!(store.lexical_calls.lock().unwrap().is_empty());
        assert_eq!(answer.retrieval.mode, RetrievalMode::Semantic);
        assert_eq!(answer.retrieval.semantic_candidates, 1);
        assert!(!answer.retrieval.rerank_applied);
        assert_eq!(answer.text, "generated");
    }

    #[tokio::test]
    async fn test_hybrid_mode_searches_both_with_candidate_limit() {
        let store = Arc::new(RecordingVectorStore {
            semantic_results: vec![chunk("doc-1", "alpha", 1.0)],
            lexical_results: vec![chunk("doc-2", "beta", 1.0)],
            ..Default::default()
        });
        let uc = use_case(store.clone(), RetrievalMode::Hybrid);

        let answer = uc.answer("q", 2, &SearchFilter::default()).await.unwrap();

        // candidate_limit = max(hybrid_candidates=30, limit=2)
        assert_eq!(store.search_calls.lock().unwrap().as_slice(), &[30]);
        assert_eq!(store.lexical_calls.lock().unwrap().as_slice(), &[30]);
        assert_eq!(answer.retrieval.semantic_candidates, 1);
        assert_eq!(answer.retrieval.lexical_candidates, 1);
        assert!(!answer.retrieval.rerank_applied);
        assert_eq!(answer.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_hybrid_rerank_orders_by_token_overlap() {
        let store = Arc::new(RecordingVectorStore {
            semantic_results: vec![
                chunk("doc-1", "alpha risk", 1.0),
                chunk("doc-2", "beta", 0.9),
            ],
            lexical_results: vec![
                chunk("doc-2", "beta", 1.0),
                chunk("doc-1", "alpha risk", 0.9),
            ],
            ..Default::default()
        });
        let uc = use_case(store.clone(), RetrievalMode::HybridRerank);

        let answer = uc.answer("alpha", 2, &SearchFilter::default()).await.unwrap();

        assert!(answer.retrieval.rerank_applied);
        assert_eq!(answer.sources[0].document_id, "doc-1");
    }

    #[tokio::test]
    async fn test_large_caller_limit_raises_candidate_limit() {
        let store = Arc::new(RecordingVectorStore::default());
        let uc = use_case(store.clone(), RetrievalMode::Hybrid);

        uc.answer("q", 50, &SearchFilter::default()).await.unwrap();

        assert_eq!(store.search_calls.lock().unwrap().as_slice(), &[50]);
        assert_eq!(store.lexical_calls.lock().unwrap().as_slice(), &[50]);
    }

    #[tokio::test]
    async fn test_empty_question_is_invalid_input() {
        let store = Arc::new(RecordingVectorStore::default());
        let uc = use_case(store, RetrievalMode::Semantic);

        let err = uc.answer("   ", 5, &SearchFilter::default()).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_empty_lexical_branch_degenerates_to_semantic_ranks() {
        let store = Arc::new(RecordingVectorStore {
            semantic_results: vec![
                chunk("doc-1", "first", 1.0),
                chunk("doc-2", "second", 0.9),
            ],
            ..Default::default()
        });
        let uc = use_case(store, RetrievalMode::Hybrid);

        let answer = uc.answer("q", 2, &SearchFilter::default()).await.unwrap();
        assert_eq!(answer.retrieval.lexical_candidates, 0);
        assert_eq!(answer.sources[0].document_id, "doc-1");
        assert_eq!(answer.sources[1].document_id, "doc-2");
    }
}
