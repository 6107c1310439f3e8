//! Client-side catch-up over the interaction log
//!
//! An observer starts with a full fetch, then polls with the last id it saw
//! as cursor. Notifications only make the next poll happen sooner, so an
//! observer that loses every push still converges on the next tick.

use super::interaction::Interaction;
use super::interaction_log::InteractionLog;
use crate::errors::Error;
use crate::event::TaskEvent;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of applying an incremental batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Number of new entries appended to the local copy
    Applied(usize),
    /// The batch skipped ids; the local copy must be rebuilt from a full fetch
    Gap { expected: i64, found: i64 },
}

/// Local copy of one task's log as an observer sees it
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    cursor: i64,
    entries: Vec<Interaction>,
    synced: bool,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last id observed, 0 before anything was seen
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn entries(&self) -> &[Interaction] {
        &self.entries
    }

    pub fn needs_full_fetch(&self) -> bool {
        !self.synced
    }

    /// Replaces the local copy with a complete snapshot
    pub fn apply_full(&mut self, mut snapshot: Vec<Interaction>) {
        snapshot.sort_by_key(|entry| entry.id);
        self.cursor = snapshot.last().map_or(0, |entry| entry.id);
        self.entries = snapshot;
        self.synced = true;
    }

    /// Appends a `fetch_since` batch to the local copy
    ///
    /// Entries at or below the cursor are duplicates and only refresh the
    /// stored copy. An id other than `cursor + 1` means something was missed:
    /// nothing past it is applied and the state asks for a full fetch.
    pub fn apply_diff(&mut self, mut batch: Vec<Interaction>) -> DiffOutcome {
        batch.sort_by_key(|entry| entry.id);

        let mut applied = 0;
        for entry in batch {
            if entry.id <= self.cursor {
                self.refresh(entry);
                continue;
            }
            if entry.id != self.cursor + 1 {
                self.synced = false;
                return DiffOutcome::Gap {
                    expected: self.cursor + 1,
                    found: entry.id,
                };
            }
            self.cursor = entry.id;
            self.entries.push(entry);
            applied += 1;
        }
        DiffOutcome::Applied(applied)
    }

    /// Replaces an already observed entry, e.g. a question that got its answer
    pub fn refresh(&mut self, entry: Interaction) {
        if let Ok(index) = self.entries.binary_search_by_key(&entry.id, |e| e.id) {
            self.entries[index] = entry;
        }
    }

    /// Questions that were still open when last observed
    pub fn open_questions(&self) -> Vec<i64> {
        self.entries
            .iter()
            .filter(|entry| entry.is_pending_question())
            .map(|entry| entry.id)
            .collect()
    }
}

/// Keeps a `SyncState` up to date for one task
pub struct LogFollower {
    log: InteractionLog,
    task_id: String,
    state: SyncState,
}

impl LogFollower {
    pub fn new(log: InteractionLog, task_id: &str) -> Self {
        Self {
            log,
            task_id: task_id.to_string(),
            state: SyncState::new(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Catches up with the log and returns the entries seen for the first time
    pub fn sync(&mut self) -> Result<Vec<Interaction>, Error> {
        let before = self.state.cursor();

        if self.state.needs_full_fetch() {
            self.state.apply_full(self.log.fetch_all(&self.task_id)?);
        } else {
            let batch = self.log.fetch_since(&self.task_id, before)?;
            if let DiffOutcome::Gap { expected, found } = self.state.apply_diff(batch) {
                warn!(
                    "Task {} log skipped from #{} to #{}, refetching",
                    self.task_id, expected, found
                );
                self.state.apply_full(self.log.fetch_all(&self.task_id)?);
            }
        }

        // Answers land on entries that are already behind the cursor
        for id in self.state.open_questions() {
            let current = self.log.get(&self.task_id, id)?;
            if !current.is_pending_question() {
                self.state.refresh(current);
            }
        }

        Ok(self
            .state
            .entries()
            .iter()
            .filter(|entry| entry.id > before)
            .cloned()
            .collect())
    }

    /// Follows the log until `token` is cancelled
    ///
    /// Polls every `poll_every` and additionally whenever a notification for
    /// this task arrives. A closed or lagging notification channel degrades
    /// to polling alone.
    ///
    /// # Arguments
    /// * `hints` - Notification receiver, typically from `EventBus::subscribe`
    /// * `poll_every` - Fallback polling period
    /// * `token` - Stops the follower
    /// * `on_update` - Called with every batch of newly observed entries
    pub async fn follow<F>(
        mut self,
        mut hints: broadcast::Receiver<TaskEvent>,
        poll_every: Duration,
        token: CancellationToken,
        mut on_update: F,
    ) -> Result<SyncState, Error>
    where
        F: FnMut(&[Interaction]) + Send,
    {
        let mut tick = tokio::time::interval(poll_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut push_open = true;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                hint = hints.recv(), if push_open => match hint {
                    Ok(event) if event.task_id != self.task_id => continue,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Follower of task {} lagged by {} events", self.task_id, skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Notifications closed, task {} falls back to polling", self.task_id);
                        push_open = false;
                        continue;
                    }
                },
                _ = tick.tick() => {}
            }

            let fresh = self.sync()?;
            if !fresh.is_empty() {
                on_update(&fresh);
            }
        }

        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{InteractionBody, NewInteraction, NewTask};
    use crate::db::{InMemoryRepository, Repository};
    use crate::event::EventBus;
    use std::sync::{Arc, Mutex};

    fn setup() -> (InteractionLog, EventBus, String) {
        let repository = Arc::new(InMemoryRepository::new());
        let task = NewTask::new("observe me").into_task();
        repository.insert_task(&task).unwrap();
        let bus = EventBus::new();
        let log = InteractionLog::new(repository, Arc::new(bus.clone()));
        (log, bus, task.id)
    }

    fn append_info(log: &InteractionLog, task_id: &str, text: &str) -> Interaction {
        log.append(NewInteraction::info(task_id, text)).unwrap()
    }

    #[test]
    fn test_diff_skips_duplicates_and_detects_gaps() {
        let (log, _bus, task_id) = setup();
        let entries: Vec<_> = (1..=4)
            .map(|i| append_info(&log, &task_id, &format!("entry {}", i)))
            .collect();

        let mut state = SyncState::new();
        state.apply_full(entries[..2].to_vec());
        assert_eq!(state.cursor(), 2);

        // Overlapping batch from a retried poll
        let outcome = state.apply_diff(entries[1..3].to_vec());
        assert_eq!(outcome, DiffOutcome::Applied(1));
        assert_eq!(state.entries().len(), 3);

        let outcome = state.apply_diff(vec![entries[3].clone()]);
        assert_eq!(outcome, DiffOutcome::Applied(1));

        let mut gapped = SyncState::new();
        gapped.apply_full(entries[..1].to_vec());
        let outcome = gapped.apply_diff(vec![entries[2].clone()]);
        assert_eq!(
            outcome,
            DiffOutcome::Gap {
                expected: 2,
                found: 3
            }
        );
        assert!(gapped.needs_full_fetch());
        assert_eq!(gapped.cursor(), 1);
    }

    #[test]
    fn test_follower_converges_on_full_log() {
        let (log, _bus, task_id) = setup();
        append_info(&log, &task_id, "first");
        let question = log
            .append(NewInteraction::new(
                &task_id,
                InteractionBody::Question {
                    text: "Which branch?".into(),
                },
            ))
            .unwrap();

        let mut follower = LogFollower::new(log.clone(), &task_id);
        assert_eq!(follower.sync().unwrap().len(), 2);

        log.respond(&task_id, question.id, "main").unwrap();
        append_info(&log, &task_id, "third");
        let fresh = follower.sync().unwrap();
        assert_eq!(fresh.len(), 1);

        assert_eq!(
            follower.state().entries(),
            log.fetch_all(&task_id).unwrap().as_slice()
        );
        assert!(follower.state().open_questions().is_empty());
        assert!(follower.sync().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_follow_without_notifications_still_polls() {
        let (log, _bus, task_id) = setup();
        let silent = EventBus::new();
        let hints = silent.subscribe();
        let token = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let follower = LogFollower::new(log.clone(), &task_id);
        let sink = seen.clone();
        let handle = tokio::spawn(follower.follow(
            hints,
            Duration::from_millis(10),
            token.clone(),
            move |fresh| sink.lock().unwrap().extend(fresh.iter().map(|e| e.id)),
        ));

        drop(silent);
        for i in 0..3 {
            append_info(&log, &task_id, &format!("entry {}", i));
        }

        for _ in 0..200 {
            if seen.lock().unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();

        let state = handle.await.unwrap().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(state.cursor(), 3);
    }
}
