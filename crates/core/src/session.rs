//! One user's conversation with one uploaded document.
//!
//! A session starts `Idle`, becomes `Ready` after the first successful upload
//! and moves through `Answering` for each question. It owns the chat history;
//! the chain only ever sees it by reference.

use crate::chain::{ChainAnswer, ConversationalRetrievalChain};
use crate::error::{ChatError, IngestError};
use crate::ingest::{IngestionPipeline, IngestionReport};
use crate::loader::DocumentLoader;
use crate::models::{ChainConfig, ChatHistory, ConversationTurn, IngestionOptions};
use crate::retriever::Retriever;
use crate::traits::{EmbeddingModel, GenerationModel};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    Ready,
    Answering,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    Processed(IngestionReport),
    AlreadyProcessed,
}

/// The models a session talks to. Refinement and answering are separate
/// handles so they can run with different temperatures.
#[derive(Clone)]
pub struct ModelSet {
    pub refiner: Arc<dyn GenerationModel>,
    pub answerer: Arc<dyn GenerationModel>,
    pub embedder: Arc<dyn EmbeddingModel>,
}

pub struct Session {
    id: Uuid,
    pipeline: IngestionPipeline,
    answerer: Arc<dyn GenerationModel>,
    chain_config: ChainConfig,
    chain: Option<ConversationalRetrievalChain>,
    history: ChatHistory,
    processed: bool,
    state: ChatState,
}

impl Session {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        models: ModelSet,
        options: IngestionOptions,
        chain_config: ChainConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        info!(session = %id, "session created");
        Self {
            id,
            pipeline: IngestionPipeline::new(loader, models.refiner, models.embedder, options),
            answerer: models.answerer,
            chain_config,
            chain: None,
            history: ChatHistory::new(),
            processed: false,
            state: ChatState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Ingests an uploaded file. Only the first successful upload counts;
    /// later calls return [`ProcessResult::AlreadyProcessed`] without doing
    /// any work. A failed upload leaves the session idle.
    pub async fn upload_document(
        &mut self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<ProcessResult, IngestError> {
        if self.processed {
            info!(
                session = %self.id,
                file = file_name,
                "document already processed, ignoring upload"
            );
            return Ok(ProcessResult::AlreadyProcessed);
        }

        let name = Path::new(file_name)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!("upload has no usable file name: {file_name}"))
            })?;

        let staging = tempfile::tempdir()?;
        let path = staging.path().join(name);
        tokio::fs::write(&path, bytes).await?;

        let document = match self.pipeline.ingest_path(&path).await {
            Ok(document) => document,
            Err(error) => {
                warn!(
                    session = %self.id,
                    file = name,
                    error = %error,
                    "document processing failed"
                );
                return Err(error);
            }
        };

        let retriever = Retriever::new(Arc::new(document.index), self.pipeline.embedder());
        self.chain = Some(ConversationalRetrievalChain::new(
            retriever,
            Arc::clone(&self.answerer),
            self.chain_config.clone(),
        ));
        self.processed = true;
        self.state = ChatState::Ready;

        info!(
            session = %self.id,
            file = name,
            chunks = document.report.chunks,
            fallbacks = document.report.fallbacks,
            "document processed"
        );
        Ok(ProcessResult::Processed(document.report))
    }

    /// Answers against the processed document and appends the turn to the
    /// history. A failed turn leaves the history untouched.
    pub async fn ask_question(&mut self, question: &str) -> Result<ChainAnswer, ChatError> {
        let chain = self.chain.as_ref().ok_or(ChatError::NotReady)?;

        let answering = AnsweringGuard::enter(&mut self.state);
        let result = chain.ask(question, &self.history).await;
        drop(answering);

        let answer = result?;
        self.history
            .push(ConversationTurn::new(answer.question.clone(), answer.answer.clone()));
        Ok(answer)
    }
}

/// Holds the session in `Answering`; dropping it, including when the
/// question future is cancelled, returns the session to `Ready`.
struct AnsweringGuard<'a> {
    state: &'a mut ChatState,
}

impl<'a> AnsweringGuard<'a> {
    fn enter(state: &'a mut ChatState) -> Self {
        *state = ChatState::Answering;
        Self { state }
    }
}

impl Drop for AnsweringGuard<'_> {
    fn drop(&mut self) {
        *self.state = ChatState::Ready;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        info!(session = %self.id, turns = self.history.len(), "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::TrigramEmbedder;
    use crate::error::ModelError;
    use crate::loader::AutoLoader;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct EchoRefiner;

    #[async_trait]
    impl GenerationModel for EchoRefiner {
        async fn invoke(&self, prompt: &str) -> Result<String, ModelError> {
            let body = prompt
                .split("\"\"\"")
                .nth(1)
                .ok_or_else(|| ModelError::Request("no chunk in prompt".to_string()))?;
            Ok(body.to_string())
        }
    }

    /// Numbers its answers; can be told to fail the next call.
    #[derive(Default)]
    struct CountingAnswerer {
        calls: AtomicUsize,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl GenerationModel for CountingAnswerer {
        async fn invoke(&self, prompt: &str) -> Result<String, ModelError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ModelError::Status {
                    backend: "test".to_string(),
                    status: 503,
                    body: "overloaded".to_string(),
                });
            }
            if prompt.ends_with("Standalone question:") {
                return Ok("What is the memo about?".to_string());
            }
            Ok(format!("answer {call}: the memo covers pump maintenance"))
        }
    }

    /// Never answers.
    struct StalledAnswerer;

    #[async_trait]
    impl GenerationModel for StalledAnswerer {
        async fn invoke(&self, _prompt: &str) -> Result<String, ModelError> {
            std::future::pending().await
        }
    }

    fn session(answerer: Arc<dyn GenerationModel>) -> Session {
        let models = ModelSet {
            refiner: Arc::new(EchoRefiner),
            answerer,
            embedder: Arc::new(TrigramEmbedder::default()),
        };
        let options = IngestionOptions {
            refine_retry: RetryPolicy::immediate(5),
            ..IngestionOptions::default()
        };
        Session::new(Arc::new(AutoLoader), models, options, ChainConfig::default())
    }

    fn memo() -> Vec<u8> {
        let text = "Pump maintenance memo: prime the pump, check seals, log hours daily.";
        let padded = format!("{text:<100}");
        assert_eq!(padded.len(), 100);
        padded.into_bytes()
    }

    #[tokio::test]
    async fn upload_then_two_questions() {
        let mut session = session(Arc::new(CountingAnswerer::default()));
        assert_eq!(session.state(), ChatState::Idle);

        let result = session.upload_document("memo.txt", &memo()).await.unwrap();
        let ProcessResult::Processed(report) = result else {
            panic!("first upload must be processed");
        };
        assert_eq!(report.chunk_size, 300);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.fallbacks, 0);
        assert_eq!(session.state(), ChatState::Ready);

        let first = session.ask_question("what is this about?").await.unwrap();
        assert!(!first.answer.is_empty());
        assert_eq!(first.sources.len(), 1);
        assert_eq!(session.history().len(), 1);
        let first_turn = session.history().turns()[0].clone();
        assert_eq!(first_turn.question, "what is this about?");

        let second = session.ask_question("and what should be logged?").await.unwrap();
        assert!(!second.answer.is_empty());
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history().turns()[0], first_turn);
        assert_eq!(session.state(), ChatState::Ready);
    }

    #[tokio::test]
    async fn asking_before_upload_is_not_ready() {
        let mut session = session(Arc::new(CountingAnswerer::default()));
        assert!(matches!(
            session.ask_question("hello?").await,
            Err(ChatError::NotReady)
        ));
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn second_upload_is_ignored() {
        let mut session = session(Arc::new(CountingAnswerer::default()));
        session.upload_document("memo.txt", &memo()).await.unwrap();

        let again = session.upload_document("other.txt", b"different text").await.unwrap();
        assert_eq!(again, ProcessResult::AlreadyProcessed);
        assert!(session.is_processed());
    }

    #[tokio::test]
    async fn failed_upload_leaves_session_idle() {
        let mut session = session(Arc::new(CountingAnswerer::default()));

        let result = session.upload_document("scan.pdf", b"%PDF-1.4\n%broken").await;
        assert!(result.is_err());
        assert!(!session.is_processed());
        assert_eq!(session.state(), ChatState::Idle);

        let retry = session.upload_document("memo.txt", &memo()).await.unwrap();
        assert!(matches!(retry, ProcessResult::Processed(_)));
    }

    #[tokio::test]
    async fn failed_turn_does_not_touch_history() {
        let answerer = Arc::new(CountingAnswerer::default());
        let mut session = session(answerer.clone());
        session.upload_document("memo.txt", &memo()).await.unwrap();
        session.ask_question("what is this about?").await.unwrap();
        let before = session.history().clone();

        answerer.fail_next.store(true, Ordering::SeqCst);
        let failed = session.ask_question("and then?").await;

        assert!(matches!(failed, Err(ChatError::Generation(_))));
        assert_eq!(session.history(), &before);
        assert_eq!(session.state(), ChatState::Ready);

        session.ask_question("and then?").await.unwrap();
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn abandoned_question_returns_session_to_ready() {
        let mut session = session(Arc::new(StalledAnswerer));
        session.upload_document("memo.txt", &memo()).await.unwrap();

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            session.ask_question("what is this about?"),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(session.state(), ChatState::Ready);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn upload_name_is_reduced_to_its_file_name() {
        let mut session = session(Arc::new(CountingAnswerer::default()));
        let result = session
            .upload_document("../../etc/memo.txt", &memo())
            .await
            .unwrap();
        assert!(matches!(result, ProcessResult::Processed(_)));
    }
}
