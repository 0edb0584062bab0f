//! LLM clean-up pass over raw chunks.
//!
//! Each chunk is rewritten independently on a bounded worker pool. A chunk
//! whose model calls keep failing is passed through untouched, so refinement
//! never aborts ingestion. Output position `i` always holds input chunk `i`.

use crate::error::{IngestError, ModelError};
use crate::models::{Chunk, RefinedChunk};
use crate::pool::WorkerPool;
use crate::prompt::PromptTemplate;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::traits::GenerationModel;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RefineTask {
    pub index: usize,
    pub chunk: Chunk,
    pub policy: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct RefineOutcome {
    pub chunk: RefinedChunk,
    pub attempts: usize,
    pub refined: bool,
}

impl RefineTask {
    pub async fn run(
        self,
        model: &dyn GenerationModel,
        template: &PromptTemplate,
    ) -> RefineOutcome {
        let rendered = {
            let fields = HashMap::from([("chunk", self.chunk.text.as_str())]);
            template.render(&fields)
        };
        let prompt = match rendered {
            Ok(prompt) => prompt,
            Err(error) => {
                warn!(
                    index = self.index,
                    error = %error,
                    "refine prompt did not render, keeping original chunk"
                );
                return self.fallback(0);
            }
        };

        let prompt = prompt.as_str();
        let outcome = run_with_retry(&self.policy, |_attempt| async move {
            let response = model.invoke(prompt).await?;
            let trimmed = response.trim();
            if trimmed.is_empty() {
                return Err(ModelError::EmptyResponse);
            }
            Ok(trimmed.to_string())
        })
        .await;

        match outcome.result {
            Ok(text) => {
                debug!(index = self.index, attempts = outcome.attempts, "chunk refined");
                RefineOutcome {
                    chunk: self.chunk.with_text(text),
                    attempts: outcome.attempts,
                    refined: true,
                }
            }
            Err(error) => {
                warn!(
                    index = self.index,
                    attempts = outcome.attempts,
                    error = %error,
                    "refinement retries exhausted, keeping original chunk"
                );
                self.fallback(outcome.attempts)
            }
        }
    }

    fn fallback(self, attempts: usize) -> RefineOutcome {
        RefineOutcome {
            chunk: self.chunk,
            attempts,
            refined: false,
        }
    }
}

pub struct ChunkRefiner {
    model: Arc<dyn GenerationModel>,
    template: Arc<PromptTemplate>,
    policy: RetryPolicy,
    pool: WorkerPool,
}

impl ChunkRefiner {
    pub fn new(model: Arc<dyn GenerationModel>, policy: RetryPolicy, pool: WorkerPool) -> Self {
        Self {
            model,
            template: Arc::new(PromptTemplate::refine()),
            policy,
            pool,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = Arc::new(template);
        self
    }

    pub async fn refine(&self, chunks: Vec<Chunk>) -> Result<Vec<RefinedChunk>, IngestError> {
        Ok(self
            .refine_detailed(chunks)
            .await?
            .into_iter()
            .map(|outcome| outcome.chunk)
            .collect())
    }

    pub async fn refine_detailed(
        &self,
        chunks: Vec<Chunk>,
    ) -> Result<Vec<RefineOutcome>, IngestError> {
        let tasks: Vec<RefineTask> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| RefineTask {
                index,
                chunk,
                policy: self.policy,
            })
            .collect();
        let total = tasks.len();

        let model = Arc::clone(&self.model);
        let template = Arc::clone(&self.template);
        let outcomes = self
            .pool
            .map(tasks, move |task: RefineTask| {
                let model = Arc::clone(&model);
                let template = Arc::clone(&template);
                async move { task.run(model.as_ref(), &template).await }
            })
            .await?;

        let fallbacks = outcomes.iter().filter(|outcome| !outcome.refined).count();
        info!(
            chunks = total,
            fallbacks,
            workers = self.pool.workers(),
            "refinement finished"
        );

        Ok(outcomes)
    }
}
