use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

pub type Metadata = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub document_title: String,
    pub source_path: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

impl DocumentFingerprint {
    pub fn page_metadata(&self, page: u32, total_pages: u32) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), Value::from(self.document_title.clone()));
        metadata.insert("file_path".to_string(), Value::from(self.source_path.clone()));
        metadata.insert("document_id".to_string(), Value::from(self.document_id.clone()));
        metadata.insert("checksum".to_string(), Value::from(self.checksum.clone()));
        metadata.insert(
            "ingested_at".to_string(),
            Value::from(self.ingested_at.to_rfc3339()),
        );
        metadata.insert("page".to_string(), Value::from(page));
        metadata.insert("total_pages".to_string(), Value::from(total_pages));
        metadata
    }
}

/// One page of loader output.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub text: String,
    pub metadata: Metadata,
}

impl PageRecord {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// Same metadata, new text.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn page(&self) -> Option<u64> {
        self.metadata.get("page").and_then(Value::as_u64)
    }
}

/// A chunk after the refinement pass. Either rewritten text or the original
/// text verbatim; metadata is never touched.
pub type RefinedChunk = Chunk;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Append-only log of answered turns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatHistory {
    turns: Vec<ConversationTurn>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Renders the log as alternating `Human:` / `Assistant:` lines.
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("Human: {}\nAssistant: {}", turn.question, turn.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<Vec<ConversationTurn>> for ChatHistory {
    fn from(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_overlap_chars: usize,
    pub min_chunk_chars: usize,
    pub chunk_size_divisor: usize,
    pub separators: Vec<String>,
    pub refine_retry: RetryPolicy,
    pub refine_workers: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_overlap_chars: 300,
            min_chunk_chars: 300,
            chunk_size_divisor: 10,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                " ".to_string(),
                String::new(),
            ],
            refine_retry: RetryPolicy::default(),
            refine_workers: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(4),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub top_k: usize,
    pub condense_question: bool,
    pub answer_retry: RetryPolicy,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            condense_question: true,
            answer_retry: RetryPolicy::single_attempt(),
        }
    }
}
