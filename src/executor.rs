use crate::harvest::{ArtifactStore, DataSource, HarvestError, HarvestOrchestrator, HarvestStats};
use crate::model::ScanWindow;
use crate::timing::{Clock, SystemClock};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

/// How a harvest session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The window closed normally
    Completed(HarvestStats),

    /// The shutdown signal fired first; the session task was aborted
    Interrupted,
}

/// Runs harvest sessions on their own tokio task.
///
/// Sessions are serialized: they share a credentials cache and an artifact
/// repository, so a second `execute` waits for the first to finish.
pub struct HarvestExecutor<S, A, C = SystemClock>
where
    S: DataSource,
    A: ArtifactStore,
    C: Clock + Clone,
{
    orchestrator: Arc<HarvestOrchestrator<S, A, C>>,
    semaphore: Arc<Semaphore>,
}

impl<S, A, C> HarvestExecutor<S, A, C>
where
    S: DataSource + 'static,
    A: ArtifactStore + 'static,
    C: Clock + Clone + 'static,
{
    pub fn new(orchestrator: HarvestOrchestrator<S, A, C>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn orchestrator(&self) -> &HarvestOrchestrator<S, A, C> {
        &self.orchestrator
    }

    /// Runs one session until the window closes or `shutdown` resolves.
    #[instrument(skip(self, ids, shutdown), fields(ids = ids.len()))]
    pub async fn execute<F>(
        &self,
        ids: BTreeSet<String>,
        window: ScanWindow,
        shutdown: F,
    ) -> Result<SessionOutcome, HarvestError>
    where
        F: Future<Output = ()>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| HarvestError::Task(format!("Semaphore error: {}", e)))?;

        info!("Starting harvest session for source: {}", self.orchestrator.source().name());

        let orchestrator = Arc::clone(&self.orchestrator);
        let mut session = tokio::spawn(async move { orchestrator.run(&ids, window).await });

        tokio::select! {
            joined = &mut session => {
                let stats = joined
                    .map_err(|e| HarvestError::Task(format!("Task join error: {}", e)))??;
                info!("Finished harvest session for source: {}", self.orchestrator.source().name());
                Ok(SessionOutcome::Completed(stats))
            }
            _ = shutdown => {
                session.abort();
                info!("Harvest session interrupted");
                Ok(SessionOutcome::Interrupted)
            }
        }
    }
}
