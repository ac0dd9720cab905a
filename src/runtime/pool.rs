/// Process-wide worker budget
///
/// One semaphore bounds concurrently running executions, another bounds concurrently
/// running node attempts across all executions. Manual runs and trigger fires share
/// the same pool, so branch parallelism inside a flow never exceeds the budget.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    executions: Arc<Semaphore>,
    nodes: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// A pool of `size` workers; zero is clamped to one
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            executions: Arc::new(Semaphore::new(size)),
            nodes: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for an execution slot; `None` once the pool is closed
    pub async fn execution_slot(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.executions).acquire_owned().await.ok()
    }

    /// Wait for a node attempt slot; `None` once the pool is closed
    pub async fn node_slot(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.nodes).acquire_owned().await.ok()
    }

    pub fn idle_node_slots(&self) -> usize {
        self.nodes.available_permits()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}
