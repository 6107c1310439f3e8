use crate::errors::Error;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Runtime handle of the single loop allowed to drive a task
pub struct ExecutionContext {
    /// Signalled by `cancel`; checked between steps and under the gate
    pub token: CancellationToken,
    /// Serializes coordinator writes against cancellation
    gate: tokio::sync::Mutex<()>,
    /// Free-form messages waiting to be handed to the agent
    inbox: Mutex<Vec<String>>,
}

impl ExecutionContext {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            gate: tokio::sync::Mutex::new(()),
            inbox: Mutex::new(Vec::new()),
        }
    }

    /// Takes the write gate unless the context has been cancelled
    ///
    /// Returns `None` once cancellation is observed; the holder of `Some` may
    /// append interactions and change the task status.
    pub async fn exclusive(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        let guard = self.gate.lock().await;
        if self.token.is_cancelled() {
            None
        } else {
            Some(guard)
        }
    }

    /// Takes the write gate regardless of cancellation
    pub async fn lock_gate(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    pub fn push_message(&self, text: &str) {
        lock(&self.inbox).push(text.to_string());
    }

    pub fn drain_messages(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.inbox))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Arena of active execution contexts keyed by task id
#[derive(Clone, Default)]
pub struct ActiveContexts {
    inner: Arc<Mutex<HashMap<String, Arc<ExecutionContext>>>>,
}

impl ActiveContexts {
    /// Atomically checks that no context exists for `task_id` and creates one
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyRunning` if another context holds the task
    pub fn claim(&self, task_id: &str) -> Result<Arc<ExecutionContext>, Error> {
        let mut contexts = lock(&self.inner);
        if contexts.contains_key(task_id) {
            return Err(Error::AlreadyRunning(task_id.to_string()));
        }
        let context = Arc::new(ExecutionContext::new());
        contexts.insert(task_id.to_string(), context.clone());
        Ok(context)
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<ExecutionContext>> {
        lock(&self.inner).get(task_id).cloned()
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        lock(&self.inner).contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.inner).len()
    }

    /// Removes `context` if it is still the one registered for `task_id`
    pub fn release(&self, task_id: &str, context: &Arc<ExecutionContext>) {
        let mut contexts = lock(&self.inner);
        if contexts
            .get(task_id)
            .is_some_and(|current| Arc::ptr_eq(current, context))
        {
            contexts.remove(task_id);
        }
    }

    /// Runs `f` and releases `context` inside one critical section
    ///
    /// Used for the final status change of a loop, so that a caller resuming
    /// the task can never observe the new status while the old context is
    /// still registered.
    pub fn settle<R>(
        &self,
        task_id: &str,
        context: &Arc<ExecutionContext>,
        f: impl FnOnce() -> R,
    ) -> R {
        let mut contexts = lock(&self.inner);
        let result = f();
        if contexts
            .get(task_id)
            .is_some_and(|current| Arc::ptr_eq(current, context))
        {
            contexts.remove(task_id);
        }
        result
    }

    /// Runs `on_active` with the registered context, or `on_idle` when none
    /// exists, without letting a claim slip in between
    pub fn with_context<R>(
        &self,
        task_id: &str,
        on_active: impl FnOnce(&ExecutionContext) -> R,
        on_idle: impl FnOnce() -> R,
    ) -> R {
        let contexts = lock(&self.inner);
        match contexts.get(task_id) {
            Some(context) => on_active(context),
            None => on_idle(),
        }
    }
}
