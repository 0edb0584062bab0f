use crate::error::{ChatError, ModelError};
use crate::index::ScoredChunk;
use crate::models::{ChainConfig, ChatHistory, ConversationTurn};
use crate::prompt::PromptTemplate;
use crate::retriever::Retriever;
use crate::retry::run_with_retry;
use crate::traits::GenerationModel;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ChainAnswer {
    pub question: String,
    /// The question actually used for retrieval; differs from `question`
    /// when a follow-up was rewritten using the history.
    pub standalone_question: String,
    pub answer: String,
    pub sources: Vec<ScoredChunk>,
}

/// Retrieval-augmented answering over one indexed document.
///
/// The chain holds no conversation state: history is owned by the caller and
/// passed in on every call.
pub struct ConversationalRetrievalChain {
    retriever: Retriever,
    llm: Arc<dyn GenerationModel>,
    condense_template: PromptTemplate,
    answer_template: PromptTemplate,
    config: ChainConfig,
}

impl ConversationalRetrievalChain {
    pub fn new(retriever: Retriever, llm: Arc<dyn GenerationModel>, config: ChainConfig) -> Self {
        Self {
            retriever: retriever.with_top_k(config.top_k),
            llm,
            condense_template: PromptTemplate::condense_question(),
            answer_template: PromptTemplate::answer(),
            config,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub async fn ask(
        &self,
        question: &str,
        history: &ChatHistory,
    ) -> Result<ChainAnswer, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let standalone_question = if self.config.condense_question && !history.is_empty() {
            self.condense(question, history).await?
        } else {
            question.to_string()
        };

        let sources = self.retriever.retrieve(&standalone_question).await?;
        let context = sources
            .iter()
            .map(|hit| hit.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let transcript = history.transcript();

        let prompt = self.answer_template.render(&HashMap::from([
            ("context", context.as_str()),
            ("chat_history", transcript.as_str()),
            ("question", standalone_question.as_str()),
        ]))?;

        let answer = self.generate(&prompt).await?;
        info!(
            sources = sources.len(),
            history_turns = history.len(),
            "question answered"
        );

        Ok(ChainAnswer {
            question: question.to_string(),
            standalone_question,
            answer,
            sources,
        })
    }

    /// Answers and returns the history extended by this turn. The input
    /// history is left as it was, including when the turn fails.
    pub async fn answer_turn(
        &self,
        question: &str,
        history: &ChatHistory,
    ) -> Result<(ChainAnswer, ChatHistory), ChatError> {
        let answer = self.ask(question, history).await?;
        let mut updated = history.clone();
        updated.push(ConversationTurn::new(answer.question.clone(), answer.answer.clone()));
        Ok((answer, updated))
    }

    async fn condense(&self, question: &str, history: &ChatHistory) -> Result<String, ChatError> {
        let transcript = history.transcript();
        let prompt = self.condense_template.render(&HashMap::from([
            ("chat_history", transcript.as_str()),
            ("question", question),
        ]))?;

        let standalone = self.generate(&prompt).await?;
        debug!(question, standalone = %standalone, "condensed follow-up question");
        Ok(standalone)
    }

    async fn generate(&self, prompt: &str) -> Result<String, ChatError> {
        let llm = self.llm.as_ref();
        let outcome = run_with_retry(&self.config.answer_retry, |_attempt| async move {
            let response = llm.invoke(prompt).await?;
            let trimmed = response.trim();
            if trimmed.is_empty() {
                return Err(ModelError::EmptyResponse);
            }
            Ok(trimmed.to_string())
        })
        .await;

        outcome.result.map_err(ChatError::Generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::TrigramEmbedder;
    use crate::index::VectorIndex;
    use crate::models::{Chunk, Metadata};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records prompts and answers from a script; rewrites are recognised by
    /// the condense prompt's closing line.
    #[derive(Default)]
    struct ScriptedModel {
        prompts: Mutex<Vec<String>>,
        failures_left: AtomicUsize,
    }

    impl ScriptedModel {
        fn failing(times: usize) -> Self {
            Self {
                prompts: Mutex::default(),
                failures_left: AtomicUsize::new(times),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationModel for ScriptedModel {
        async fn invoke(&self, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(ModelError::Request("model unavailable".to_string()));
            }
            if prompt.ends_with("Standalone question:") {
                Ok("How often should the pump seals be replaced?".to_string())
            } else {
                Ok(" The seals are replaced every 500 hours. ".to_string())
            }
        }
    }

    async fn chain(model: Arc<ScriptedModel>, config: ChainConfig) -> ConversationalRetrievalChain {
        let embedder = Arc::new(TrigramEmbedder::default());
        let chunks = vec![
            Chunk::new("Pump seals are replaced every 500 operating hours.", Metadata::new()),
            Chunk::new("The warranty covers parts for two years.", Metadata::new()),
            Chunk::new("Store the unit in a dry place.", Metadata::new()),
        ];
        let index = VectorIndex::build(embedder.as_ref(), chunks).await.unwrap();
        let retriever = Retriever::new(Arc::new(index), embedder);
        ConversationalRetrievalChain::new(retriever, model, config)
    }

    #[tokio::test]
    async fn first_question_skips_condensing() {
        let model = Arc::new(ScriptedModel::default());
        let chain = chain(model.clone(), ChainConfig::default()).await;

        let answer = chain
            .ask("When are pump seals replaced?", &ChatHistory::new())
            .await
            .unwrap();

        assert_eq!(answer.answer, "The seals are replaced every 500 hours.");
        assert_eq!(answer.standalone_question, "When are pump seals replaced?");
        assert_eq!(answer.sources.len(), 3);
        assert_eq!(
            answer.sources[0].chunk.text,
            "Pump seals are replaced every 500 operating hours."
        );

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Pump seals are replaced every 500 operating hours."));
        assert!(prompts[0].ends_with("Question: When are pump seals replaced?\nHelpful Answer:"));
    }

    #[tokio::test]
    async fn follow_up_is_condensed_with_history() {
        let model = Arc::new(ScriptedModel::default());
        let chain = chain(model.clone(), ChainConfig::default()).await;
        let history = ChatHistory::from(vec![ConversationTurn::new(
            "Tell me about the pump seals",
            "They wear out over time.",
        )]);

        let answer = chain.ask("how often?", &history).await.unwrap();

        assert_eq!(
            answer.standalone_question,
            "How often should the pump seals be replaced?"
        );
        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0]
            .contains("Human: Tell me about the pump seals\nAssistant: They wear out over time."));
        assert!(prompts[0].contains("Follow Up Input: how often?"));
        assert!(prompts[1].contains("Assistant: They wear out over time."));
        assert!(prompts[1].contains("Question: How often should the pump seals be replaced?"));
    }

    #[tokio::test]
    async fn condensing_can_be_disabled() {
        let model = Arc::new(ScriptedModel::default());
        let config = ChainConfig {
            condense_question: false,
            ..ChainConfig::default()
        };
        let chain = chain(model.clone(), config).await;
        let history = ChatHistory::from(vec![ConversationTurn::new("q", "a")]);

        let answer = chain.ask("how often?", &history).await.unwrap();
        assert_eq!(answer.standalone_question, "how often?");
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn answer_turn_extends_a_copy_of_history() {
        let model = Arc::new(ScriptedModel::default());
        let chain = chain(model, ChainConfig::default()).await;
        let history = ChatHistory::new();

        let (_, updated) = chain.answer_turn("When are seals replaced?", &history).await.unwrap();
        let (_, updated_again) = chain.answer_turn("and the warranty?", &updated).await.unwrap();

        assert!(history.is_empty());
        assert_eq!(updated.len(), 1);
        assert_eq!(updated_again.len(), 2);
        assert_eq!(updated_again.turns()[0], updated.turns()[0]);
    }

    #[tokio::test]
    async fn generation_failure_surfaces_without_retry_by_default() {
        let model = Arc::new(ScriptedModel::failing(1));
        let chain = chain(model.clone(), ChainConfig::default()).await;

        let result = chain.answer_turn("When are seals replaced?", &ChatHistory::new()).await;
        assert!(matches!(result, Err(ChatError::Generation(_))));
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn answer_retry_policy_is_configurable() {
        let model = Arc::new(ScriptedModel::failing(2));
        let config = ChainConfig {
            answer_retry: RetryPolicy::immediate(3),
            ..ChainConfig::default()
        };
        let chain = chain(model.clone(), config).await;

        let answer = chain.ask("When are seals replaced?", &ChatHistory::new()).await.unwrap();
        assert_eq!(answer.answer, "The seals are replaced every 500 hours.");
        assert_eq!(model.prompts().len(), 3);
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let chain = chain(Arc::new(ScriptedModel::default()), ChainConfig::default()).await;
        assert!(matches!(
            chain.ask("  ", &ChatHistory::new()).await,
            Err(ChatError::EmptyQuestion)
        ));
    }
}
