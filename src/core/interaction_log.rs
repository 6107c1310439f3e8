use super::interaction::{Interaction, InteractionQuery, NewInteraction};
use crate::db::Repository;
use crate::errors::Error;
use crate::event::{EventKind, Notifier};
use std::sync::Arc;
use tracing::debug;

/// Append-only, per-task ordered record of everything that happened
///
/// Thin layer over the repository that publishes a notification for every
/// append and every attached response. Sequence ids are assigned by the
/// repository inside the same atomic write as the row itself.
#[derive(Clone)]
pub struct InteractionLog {
    repository: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
}

impl InteractionLog {
    pub fn new(repository: Arc<dyn Repository>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            repository,
            notifier,
        }
    }

    /// Appends an entry and returns it with its assigned id
    ///
    /// # Errors
    ///
    /// Returns `Error::RepositoryUnavailable` when the write did not happen;
    /// callers must treat the entry as not written.
    pub fn append(&self, new: NewInteraction) -> Result<Interaction, Error> {
        let interaction = self.repository.append_interaction(&new)?;
        debug!(
            "Task {} appended {} #{}",
            interaction.task_id, interaction.interaction_type, interaction.id
        );
        self.notifier.publish(
            &interaction.task_id,
            EventKind::InteractionAppended {
                interaction_id: interaction.id,
            },
        );
        Ok(interaction)
    }

    /// Full ordered log of a task
    pub fn fetch_all(&self, task_id: &str) -> Result<Vec<Interaction>, Error> {
        self.repository
            .list_interactions(task_id, &InteractionQuery::default())
    }

    /// Entries with an id strictly greater than `cursor`, ascending
    pub fn fetch_since(&self, task_id: &str, cursor: i64) -> Result<Vec<Interaction>, Error> {
        self.repository
            .list_interactions(task_id, &InteractionQuery::since(cursor))
    }

    pub fn fetch(&self, task_id: &str, query: &InteractionQuery) -> Result<Vec<Interaction>, Error> {
        self.repository.list_interactions(task_id, query)
    }

    pub fn get(&self, task_id: &str, interaction_id: i64) -> Result<Interaction, Error> {
        self.repository.get_interaction(task_id, interaction_id)
    }

    /// Attaches the single allowed response to a pending question
    ///
    /// # Errors
    ///
    /// * `Error::NotAQuestion` if the entry does not take responses
    /// * `Error::AlreadyResponded` if a response is already attached; the stored
    ///   response is left untouched
    pub fn respond(
        &self,
        task_id: &str,
        interaction_id: i64,
        text: &str,
    ) -> Result<Interaction, Error> {
        let interaction = self
            .repository
            .respond_to_question(task_id, interaction_id, text)?;
        self.notifier.publish(
            task_id,
            EventKind::InteractionAppended { interaction_id },
        );
        Ok(interaction)
    }

    /// The question currently blocking the task, if any
    pub fn pending_question(&self, task_id: &str) -> Result<Option<Interaction>, Error> {
        let pending = self
            .repository
            .list_interactions(task_id, &InteractionQuery::pending())?;
        Ok(pending.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{InteractionBody, NewTask};
    use crate::db::InMemoryRepository;
    use crate::event::EventBus;

    fn log_with_task() -> (InteractionLog, EventBus, String) {
        let repository = Arc::new(InMemoryRepository::new());
        let task = NewTask::new("Compare two configs").into_task();
        repository.insert_task(&task).unwrap();
        let bus = EventBus::new();
        let log = InteractionLog::new(repository, Arc::new(bus.clone()));
        (log, bus, task.id)
    }

    #[test]
    fn test_fetch_since_composes_with_earlier_reads() {
        let (log, _bus, task_id) = log_with_task();
        for n in 0..6 {
            log.append(NewInteraction::info(&task_id, &format!("entry {}", n)))
                .unwrap();
        }
        let all = log.fetch_all(&task_id).unwrap();

        for cursor in 0..=6 {
            let mut seen: Vec<Interaction> =
                all.iter().filter(|i| i.id <= cursor).cloned().collect();
            seen.extend(log.fetch_since(&task_id, cursor).unwrap());
            assert_eq!(seen, all, "cursor {}", cursor);
        }
    }

    #[tokio::test]
    async fn test_append_and_respond_publish_hints() {
        let (log, bus, task_id) = log_with_task();
        let mut rx = bus.subscribe();

        let question = log
            .append(NewInteraction::new(
                &task_id,
                InteractionBody::Question {
                    text: "Which one is newer?".into(),
                },
            ))
            .unwrap();
        assert_eq!(
            log.pending_question(&task_id).unwrap().map(|q| q.id),
            Some(question.id)
        );

        log.respond(&task_id, question.id, "the second").unwrap();
        assert!(log.pending_question(&task_id).unwrap().is_none());
        assert!(matches!(
            log.respond(&task_id, question.id, "the first"),
            Err(Error::AlreadyResponded(_))
        ));
        assert_eq!(
            log.get(&task_id, question.id).unwrap().response.as_deref(),
            Some("the second")
        );

        assert_eq!(rx.recv().await.unwrap().task_id, task_id);
        assert_eq!(rx.recv().await.unwrap().task_id, task_id);
        assert!(rx.try_recv().is_err());
    }
}
