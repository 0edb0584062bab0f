use crate::error::IngestError;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Runs async jobs with at most `workers` in flight and returns their outputs
/// in input order, whatever order they finish in.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn map<T, F, Fut>(
        &self,
        jobs: Vec<T>,
        run: F,
    ) -> Result<Vec<Fut::Output>, IngestError>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let total = jobs.len();
        let run = Arc::new(run);
        let mut slots: Vec<Option<Fut::Output>> = (0..total).map(|_| None).collect();
        let mut queued = jobs.into_iter().enumerate();
        let mut running = JoinSet::new();

        loop {
            while running.len() < self.workers {
                let Some((index, job)) = queued.next() else {
                    break;
                };
                let run = Arc::clone(&run);
                running.spawn(async move { (index, run(job).await) });
            }

            match running.join_next().await {
                Some(joined) => {
                    let (index, output) =
                        joined.map_err(|error| IngestError::Worker(error.to_string()))?;
                    slots[index] = Some(output);
                }
                None => break,
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| IngestError::Worker(format!("job {index} produced no output")))
            })
            .collect()
    }
}
