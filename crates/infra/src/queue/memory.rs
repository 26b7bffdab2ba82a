use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use taskrelay_core::RetryPolicy;

use super::{QueueService, QueueServiceError, RemoteTask};

/// In-memory queue service for tests/dev.
///
/// Queues and tasks are keyed by name only; project and location are
/// ignored. Unknown queues get [`RetryPolicy::default`], unknown tasks have no
/// first attempt.
#[derive(Debug, Default)]
pub struct InMemoryQueueService {
    policies: RwLock<HashMap<String, RetryPolicy>>,
    tasks: RwLock<HashMap<String, RemoteTask>>,
    unavailable: AtomicBool,
    delay: RwLock<Option<Duration>>,
    policy_lookups: AtomicUsize,
    task_lookups: AtomicUsize,
}

impl InMemoryQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(self, queue: impl Into<String>, policy: RetryPolicy) -> Self {
        self.set_policy(queue, policy);
        self
    }

    pub fn with_task(self, task: impl Into<String>, remote: RemoteTask) -> Self {
        self.set_task(task, remote);
        self
    }

    pub fn set_policy(&self, queue: impl Into<String>, policy: RetryPolicy) {
        if let Ok(mut policies) = self.policies.write() {
            policies.insert(queue.into(), policy);
        }
    }

    pub fn set_task(&self, task: impl Into<String>, remote: RemoteTask) {
        if let Ok(mut tasks) = self.tasks.write() {
            tasks.insert(task.into(), remote);
        }
    }

    /// Make every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call (to exercise caller-side timeouts).
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut d) = self.delay.write() {
            *d = delay;
        }
    }

    pub fn policy_lookups(&self) -> usize {
        self.policy_lookups.load(Ordering::SeqCst)
    }

    pub fn task_lookups(&self) -> usize {
        self.task_lookups.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> Result<(), QueueServiceError> {
        let delay = self.delay.read().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueServiceError::Transport("queue service unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn get_retry_policy(
        &self,
        _project: &str,
        _location: &str,
        queue: &str,
    ) -> Result<RetryPolicy, QueueServiceError> {
        self.policy_lookups.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;

        let policies = self
            .policies
            .read()
            .map_err(|_| QueueServiceError::Transport("lock poisoned".to_string()))?;
        Ok(policies.get(queue).cloned().unwrap_or_default())
    }

    async fn get_task(
        &self,
        _project: &str,
        _location: &str,
        _queue: &str,
        task: &str,
    ) -> Result<RemoteTask, QueueServiceError> {
        self.task_lookups.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;

        let tasks = self
            .tasks
            .read()
            .map_err(|_| QueueServiceError::Transport("lock poisoned".to_string()))?;
        Ok(tasks.get(task).cloned().unwrap_or_default())
    }
}
