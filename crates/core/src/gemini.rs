use crate::error::ModelError;
use crate::traits::{EmbeddingModel, GenerationModel};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const BACKEND: &str = "gemini";
/// Request cap of `batchEmbedContents`.
const MAX_BATCH_REQUESTS: usize = 100;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub generation_model: String,
    pub embedding_model: String,
    pub refine_temperature: f32,
    pub answer_temperature: f32,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/".to_string(),
            generation_model: "gemini-2.0-flash".to_string(),
            embedding_model: "models/embedding-001".to_string(),
            refine_temperature: 0.0,
            answer_temperature: 0.5,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Shared HTTP state for every Gemini model handle built from one config.
#[derive(Clone)]
pub struct GeminiClient {
    client: Arc<Client>,
    base_url: Url,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self, ModelError> {
        if config.api_key.trim().is_empty() {
            return Err(ModelError::Request("missing Gemini API key".to_string()));
        }

        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client: Arc::new(client),
            base_url: Url::parse(&base)?,
            api_key: config.api_key.trim().to_string(),
        })
    }

    pub fn generator(&self, model: &str, temperature: f32) -> Result<GeminiGenerator, ModelError> {
        Ok(GeminiGenerator {
            endpoint: self.model_endpoint(model, "generateContent")?,
            client: self.clone(),
            temperature,
        })
    }

    pub fn embedder(&self, model: &str) -> Result<GeminiEmbedder, ModelError> {
        Ok(GeminiEmbedder {
            endpoint: self.model_endpoint(model, "embedContent")?,
            batch_endpoint: self.model_endpoint(model, "batchEmbedContents")?,
            model: qualified_model(model),
            client: self.clone(),
        })
    }

    fn model_endpoint(&self, model: &str, method: &str) -> Result<Url, ModelError> {
        Ok(self
            .base_url
            .join(&format!("{}:{method}", qualified_model(model)))?)
    }

    async fn post(&self, endpoint: &Url, body: serde_json::Value) -> Result<String, ModelError> {
        let response = self
            .client
            .post(endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ModelError::Status {
                backend: BACKEND.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }
}

fn qualified_model(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

pub struct GeminiGenerator {
    client: GeminiClient,
    endpoint: Url,
    temperature: f32,
}

#[async_trait]
impl GenerationModel for GeminiGenerator {
    async fn invoke(&self, prompt: &str) -> Result<String, ModelError> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": { "temperature": self.temperature }
        });

        let raw = self.client.post(&self.endpoint, body).await?;
        parse_generate_response(&raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskType {
    Document,
    Query,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            TaskType::Document => "RETRIEVAL_DOCUMENT",
            TaskType::Query => "RETRIEVAL_QUERY",
        }
    }
}

fn embed_request(model: &str, text: &str, task: TaskType) -> serde_json::Value {
    json!({
        "model": model,
        "content": { "parts": [{ "text": text }] },
        "taskType": task.as_str()
    })
}

pub struct GeminiEmbedder {
    client: GeminiClient,
    endpoint: Url,
    batch_endpoint: Url,
    model: String,
}

impl GeminiEmbedder {
    async fn embed_as(&self, text: &str, task: TaskType) -> Result<Vec<f32>, ModelError> {
        let body = embed_request(&self.model, text, task);
        let raw = self.client.post(&self.endpoint, body).await?;
        parse_embed_response(&raw)
    }
}

#[async_trait]
impl EmbeddingModel for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.embed_as(text, TaskType::Document).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.embed_as(text, TaskType::Query).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_REQUESTS) {
            let requests: Vec<serde_json::Value> = batch
                .iter()
                .map(|text| embed_request(&self.model, text, TaskType::Document))
                .collect();
            let raw = self
                .client
                .post(&self.batch_endpoint, json!({ "requests": requests }))
                .await?;
            vectors.extend(parse_batch_embed_response(&raw, batch.len())?);
        }
        Ok(vectors)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

fn malformed(details: impl Into<String>) -> ModelError {
    ModelError::BackendResponse {
        backend: BACKEND.to_string(),
        details: details.into(),
    }
}

fn parse_generate_response(raw: &str) -> Result<String, ModelError> {
    let payload: GenerateResponse =
        serde_json::from_str(raw).map_err(|error| malformed(error.to_string()))?;

    let text = payload
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .ok_or_else(|| malformed("response has no candidates"))?;

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ModelError::EmptyResponse);
    }
    Ok(text)
}

fn parse_embed_response(raw: &str) -> Result<Vec<f32>, ModelError> {
    let payload: EmbedResponse =
        serde_json::from_str(raw).map_err(|error| malformed(error.to_string()))?;

    match payload.embedding {
        Some(embedding) if !embedding.values.is_empty() => Ok(embedding.values),
        _ => Err(malformed("response has no embedding values")),
    }
}

fn parse_batch_embed_response(raw: &str, expected: usize) -> Result<Vec<Vec<f32>>, ModelError> {
    let payload: BatchEmbedResponse =
        serde_json::from_str(raw).map_err(|error| malformed(error.to_string()))?;

    if payload.embeddings.len() != expected {
        return Err(malformed(format!(
            "expected {expected} embeddings, got {}",
            payload.embeddings.len()
        )));
    }
    if payload.embeddings.iter().any(|embedding| embedding.values.is_empty()) {
        return Err(malformed("batch response has an empty embedding"));
    }

    Ok(payload
        .embeddings
        .into_iter()
        .map(|embedding| embedding.values)
        .collect())
}
