//! Ollama HTTP adapter
//!
//! One shared client owns the HTTP connection pool; thin wrappers
//! implement the embedder, classifier, and generator ports. Every request
//! runs through the resilience executor and transient failures surface as
//! `Temporary`.

mod prompt;

pub use prompt::{build_answer_prompt, build_classification_prompt};

use crate::domain::{Classification, RetrievedChunk};
use crate::error::{Error, Result};
use crate::ports::{AnswerGenerator, DocumentClassifier, Embedder};
use crate::resilience::{surface_temporary, ErrorClassification, Executor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Shared Ollama HTTP client
pub struct OllamaClient {
    base_url: Url,
    gen_model: String,
    embed_model: String,
    http: reqwest::Client,
    executor: Arc<Executor>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    pub fn new(
        base_url: &str,
        gen_model: &str,
        embed_model: &str,
        executor: Arc<Executor>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            base_url: Url::parse(base_url)?,
            gen_model: gen_model.to_string(),
            embed_model: embed_model.to_string(),
            http,
            executor,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn generate(&self, operation: &str, prompt: &str, json_mode: bool) -> Result<String> {
        let url = self.endpoint("/api/generate")?;
        let request = GenerateRequest {
            model: &self.gen_model,
            prompt,
            stream: false,
            format: json_mode.then_some("json"),
        };

        let response: GenerateResponse = self
            .executor
            .execute(operation, classify_llm_error, || async {
                send_json(&self.http, &url, operation, &request).await
            })
            .await
            .map_err(|e| surface_temporary(operation, e, classify_llm_error))?;

        Ok(response.response.trim().to_string())
    }

    pub async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.generate("ollama.generate", prompt, false).await
    }

    pub async fn generate_json(&self, prompt: &str) -> Result<String> {
        self.generate("ollama.generate_json", prompt, true).await
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint("/api/embed")?;
        let request = EmbedRequest {
            model: &self.embed_model,
            input: texts,
        };

        let response: EmbedResponse = self
            .executor
            .execute("ollama.embed", classify_llm_error, || async {
                send_json(&self.http, &url, "ollama.embed", &request).await
            })
            .await
            .map_err(|e| surface_temporary("ollama.embed", e, classify_llm_error))?;

        Ok(response.embeddings)
    }
}

async fn send_json<T, R>(
    http: &reqwest::Client,
    url: &Url,
    operation: &str,
    request: &T,
) -> Result<R>
where
    T: Serialize,
    R: for<'de> Deserialize<'de>,
{
    let response = http.post(url.clone()).json(request).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let mut body = body.trim().to_string();
        body.truncate(2048);
        return Err(Error::HttpStatus {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<R>().await?)
}

/// Embedder backed by the Ollama embeddings endpoint
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
}

impl OllamaEmbedder {
    pub fn new(client: Arc<OllamaClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.client.embed_texts(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.client.embed_texts(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Other("empty embedding result".to_string()))
    }
}

/// Classifier backed by JSON-mode generation
pub struct OllamaClassifier {
    client: Arc<OllamaClient>,
}

impl OllamaClassifier {
    pub fn new(client: Arc<OllamaClient>) -> Self {
        Self { client }
    }
}

/// Classification as the model emits it; `tags` may be null.
#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    category: String,
    #[serde(default)]
    subcategory: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    summary: String,
}

#[async_trait::async_trait]
impl DocumentClassifier for OllamaClassifier {
    async fn classify(&self, text: &str) -> Result<Classification> {
        let raw = self
            .client
            .generate_json(&build_classification_prompt(text))
            .await?;

        let parsed: RawClassification = serde_json::from_str(extract_json_object(&raw))
            .map_err(|e| Error::Other(format!("parse classification json: {e}")))?;
        Ok(Classification {
            category: parsed.category,
            subcategory: parsed.subcategory,
            tags: parsed.tags.unwrap_or_default(),
            confidence: parsed.confidence,
            summary: parsed.summary,
        })
    }
}

/// Answer generator backed by plain-text generation
pub struct OllamaGenerator {
    client: Arc<OllamaClient>,
}

impl OllamaGenerator {
    pub fn new(client: Arc<OllamaClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl AnswerGenerator for OllamaGenerator {
    async fn generate_answer(&self, question: &str, chunks: &[RetrievedChunk]) -> Result<String> {
        self.client
            .generate_text(&build_answer_prompt(question, chunks))
            .await
    }

    async fn generate_from_prompt(&self, prompt: &str) -> Result<String> {
        self.client.generate_text(prompt).await
    }

    async fn generate_json_from_prompt(&self, prompt: &str) -> Result<String> {
        self.client.generate_json(prompt).await
    }
}

/// Pull the outermost JSON object out of a model response that may carry
/// stray prose around it.
fn extract_json_object(raw: &str) -> &str {
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            return &raw[start..=end];
        }
    }
    raw
}

pub(crate) fn classify_llm_error(err: &Error) -> ErrorClassification {
    match err {
        Error::Canceled => ErrorClassification {
            retryable: false,
            record_failure: false,
        },
        Error::CircuitOpen(_) => ErrorClassification {
            retryable: true,
            record_failure: true,
        },
        Error::HttpStatus { status, .. } => {
            if retryable_http_status(*status) {
                ErrorClassification {
                    retryable: true,
                    record_failure: true,
                }
            } else {
                ErrorClassification {
                    retryable: false,
                    record_failure: false,
                }
            }
        }
        Error::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
            ErrorClassification {
                retryable: true,
                record_failure: true,
            }
        }
        _ => ErrorClassification {
            retryable: false,
            record_failure: true,
        },
    }
}

/// 408, 429, and 5xx are worth retrying, except 501 and 505 which signal
/// a permanent protocol mismatch.
pub(crate) fn retryable_http_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}
