// Quest store
// Loads quests and drives the signed-in user through the current quest's tasks:
// NotStarted -> InProgress -> ReadyToSubmit -> Completed

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use super::{Observable, ViewState};
use crate::error::{AppError, AppResult};
use crate::models::{AuthUser, Quest, QuestCompletion, QuestProgress, QuestRun, TaskAnswer};
use crate::services::DataService;

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuestSnapshot {
    pub quests: Vec<Quest>,
    pub current_quest: Option<Quest>,
    pub run: QuestRun,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl ViewState for QuestSnapshot {
    fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }

    fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }
}

pub struct QuestStore {
    data: Arc<dyn DataService>,
    photo_bucket: String,
    view: Observable<QuestSnapshot>,
}

impl QuestStore {
    pub fn new(data: Arc<dyn DataService>, photo_bucket: &str) -> Self {
        Self {
            data,
            photo_bucket: photo_bucket.to_string(),
            view: Observable::new(QuestSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> QuestSnapshot {
        self.view.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<QuestSnapshot> {
        self.view.subscribe()
    }

    /// Whether `quest_id` is the quest currently loaded
    pub fn is_current(&self, quest_id: &str) -> bool {
        self.view
            .snapshot()
            .current_quest
            .map_or(false, |q| q.id == quest_id)
    }

    fn session_user(&self) -> AppResult<AuthUser> {
        self.data.session_user().ok_or(AppError::NotAuthenticated)
    }

    fn loaded_quest(&self, quest_id: &str) -> AppResult<Quest> {
        self.view
            .snapshot()
            .current_quest
            .filter(|q| q.id == quest_id)
            .ok_or_else(|| AppError::Precondition(format!("Quest {} is not loaded", quest_id)))
    }

    fn set_run(&self, run: QuestRun) {
        self.view.update(|s| s.run = run);
    }

    /// Forget the loaded quest and its run; the next action reloads both for
    /// whoever is signed in then
    pub fn clear_run(&self) {
        self.view.update(|s| {
            s.current_quest = None;
            s.run = QuestRun::NotStarted;
            s.error = None;
        });
    }

    // =========================================================================
    // LOADING
    // =========================================================================

    /// All quests, each with its ordered tasks
    pub async fn fetch_quests(&self) -> AppResult<Vec<Quest>> {
        self.view.begin();
        let result = self.load_quests().await;
        if let Ok(quests) = &result {
            let quests = quests.clone();
            self.view.update(|s| s.quests = quests);
        }
        self.view.finish(result)
    }

    async fn load_quests(&self) -> AppResult<Vec<Quest>> {
        let quests = self.data.list_quests().await?;
        let loaded = try_join_all(quests.into_iter().map(|quest| async move {
            let tasks = self.data.list_tasks(&quest.id).await?;
            Ok::<Quest, AppError>(Quest { tasks, ..quest })
        }))
        .await?;

        tracing::info!("Loaded {} quests", loaded.len());
        Ok(loaded)
    }

    /// Load one quest and, for a signed-in user, any run already underway
    pub async fn fetch_quest_by_id(&self, quest_id: &str) -> AppResult<Quest> {
        self.view.begin();
        let result = self.load_quest(quest_id).await;
        self.view.finish(result)
    }

    async fn load_quest(&self, quest_id: &str) -> AppResult<Quest> {
        let quest = self
            .data
            .get_quest(quest_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Quest".to_string()))?;
        let tasks = self.data.list_tasks(quest_id).await?;
        let quest = Quest { tasks, ..quest };

        let run = match self.data.session_user() {
            None => QuestRun::NotStarted,
            Some(user) => match self.data.get_progress(&user.id, quest_id).await {
                Ok(Some(progress)) => QuestRun::resume(progress, quest.tasks.len()),
                Ok(None) => QuestRun::NotStarted,
                Err(e) => {
                    tracing::error!("Error fetching quest progress: {}", e);
                    QuestRun::NotStarted
                }
            },
        };

        tracing::info!("Loaded quest {} ({} tasks), run {}", quest.id, quest.tasks.len(), run.name());
        let current = quest.clone();
        self.view.update(|s| {
            s.current_quest = Some(current);
            s.run = run;
        });
        Ok(quest)
    }

    // =========================================================================
    // RUN
    // =========================================================================

    /// Begin a fresh run of the loaded quest, replacing any stored progress
    pub async fn start_quest(&self, quest_id: &str) -> AppResult<QuestRun> {
        self.view.begin();
        let result = self.begin_run(quest_id).await;
        self.view.finish(result)
    }

    async fn begin_run(&self, quest_id: &str) -> AppResult<QuestRun> {
        let user = self.session_user()?;
        let quest = self.loaded_quest(quest_id)?;

        let progress = QuestProgress::start(&user.id, quest_id, Utc::now());
        self.data.upsert_progress(&progress).await?;

        let run = QuestRun::resume(progress, quest.tasks.len());
        tracing::info!("User {} started quest {}", user.id, quest_id);
        self.set_run(run.clone());
        Ok(run)
    }

    /// Validate `answer` for the current task and advance on success.
    /// The stored record is updated first; local state follows only once
    /// that write went through.
    pub async fn complete_task(&self, task_id: &str, answer: TaskAnswer) -> AppResult<QuestRun> {
        self.view.begin();
        let result = self.advance(task_id, &answer).await;
        self.view.finish(result)
    }

    async fn advance(&self, task_id: &str, answer: &TaskAnswer) -> AppResult<QuestRun> {
        let user = self.session_user()?;
        let snapshot = self.view.snapshot();
        let quest = snapshot
            .current_quest
            .ok_or_else(|| AppError::Precondition("No quest loaded".to_string()))?;
        let progress = match snapshot.run {
            QuestRun::InProgress(progress) => progress,
            other => {
                return Err(AppError::Precondition(format!(
                    "Quest is {}, not in progress",
                    other.name()
                )))
            }
        };

        ensure_owner(&user, &progress)?;

        let task = quest
            .tasks
            .get(progress.current_task_index)
            .ok_or_else(|| AppError::Precondition("Current task is missing".to_string()))?;

        if task.id != task_id {
            return Err(AppError::TaskMismatch {
                expected: task.id.clone(),
                got: task_id.to_string(),
            });
        }

        if !task.accepts(answer) {
            tracing::info!("Answer for task {} rejected", task.id);
            return Err(AppError::TaskValidationFailed);
        }

        if let TaskAnswer::Photo(file) = answer {
            let key = format!(
                "{}/{}/{}-{}.{}",
                user.id,
                quest.id,
                task.id,
                Utc::now().timestamp_millis(),
                file.extension()
            );
            self.data
                .upload_object(&self.photo_bucket, &key, file, false)
                .await?;
            tracing::info!("Stored photo for task {} at {}", task.id, key);
        }

        let next = progress.advanced(task);
        self.data.update_progress(&next, progress.revision).await?;

        tracing::info!(
            "User {} completed task {} ({}/{}), {} points so far",
            user.id,
            task.id,
            next.current_task_index,
            quest.tasks.len(),
            next.points_earned
        );

        let run = QuestRun::resume(next, quest.tasks.len());
        self.set_run(run.clone());
        Ok(run)
    }

    /// Record the finished run, credit its points and drop the progress row
    pub async fn submit_quest(&self) -> AppResult<QuestCompletion> {
        self.submit_quest_at(Utc::now()).await
    }

    pub async fn submit_quest_at(&self, completed_at: DateTime<Utc>) -> AppResult<QuestCompletion> {
        self.view.begin();
        let result = self.finish_run(completed_at).await;
        self.view.finish(result)
    }

    async fn finish_run(&self, completed_at: DateTime<Utc>) -> AppResult<QuestCompletion> {
        let user = self.session_user()?;
        let (progress, recorded) = match self.view.snapshot().run {
            QuestRun::ReadyToSubmit { progress, recorded } => (progress, recorded),
            QuestRun::InProgress(_) => {
                return Err(AppError::Precondition(
                    "Quest still has unfinished tasks".to_string(),
                ))
            }
            other => {
                return Err(AppError::Precondition(format!(
                    "Nothing to submit: quest is {}",
                    other.name()
                )))
            }
        };
        ensure_owner(&user, &progress)?;

        // a retry after a failed points credit reuses the stored completion
        let saved = match recorded {
            Some(saved) => {
                tracing::info!("Completion for quest {} already stored, resuming submit", saved.quest_id);
                saved
            }
            None => {
                let completion = QuestCompletion::from_progress(&progress, completed_at);
                let saved = self.data.insert_completion(&completion).await?;
                self.set_run(QuestRun::ReadyToSubmit {
                    progress: progress.clone(),
                    recorded: Some(saved.clone()),
                });
                saved
            }
        };

        self.data
            .increment_user_points(&user.id, progress.points_earned)
            .await?;

        // the completion is already recorded; a leftover row is only noise
        if let Err(e) = self.data.delete_progress(&user.id, &progress.quest_id).await {
            tracing::error!("Error deleting progress: {}", e);
        }

        tracing::info!(
            "User {} finished quest {}: {} points in {} min",
            user.id,
            saved.quest_id,
            saved.points_earned,
            saved.time_taken
        );
        self.set_run(QuestRun::Completed(saved.clone()));
        Ok(saved)
    }

    /// Abandon the current run
    pub async fn reset_quest_progress(&self) -> AppResult<()> {
        self.view.begin();
        let result = self.abandon().await;
        self.view.finish(result)
    }

    async fn abandon(&self) -> AppResult<()> {
        let user = self.session_user()?;
        if let Some(progress) = self.view.snapshot().run.progress() {
            ensure_owner(&user, progress)?;
            self.data
                .delete_progress(&user.id, &progress.quest_id)
                .await?;
            tracing::info!("User {} abandoned quest {}", user.id, progress.quest_id);
        }
        self.set_run(QuestRun::NotStarted);
        Ok(())
    }
}

/// Progress held in memory may only be written on behalf of its own user
fn ensure_owner(user: &AuthUser, progress: &QuestProgress) -> AppResult<()> {
    if progress.user_id != user.id {
        tracing::warn!(
            "Quest {} run belongs to {}, not the signed-in {}",
            progress.quest_id,
            progress.user_id,
            user.id
        );
        return Err(AppError::Precondition(
            "Quest progress belongs to another user; reload the quest".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quest::tests::task;
    use crate::models::{Difficulty, Task, TaskKind, UploadFile};
    use crate::services::MemoryService;
    use chrono::Duration;

    fn quest(id: &str, tasks: Vec<Task>) -> Quest {
        Quest {
            id: id.to_string(),
            title: "Old town".to_string(),
            description: String::new(),
            difficulty: Difficulty::Medium,
            estimated_time: 90,
            points_reward: tasks.iter().map(|t| t.points).sum(),
            tasks: tasks
                .into_iter()
                .map(|t| Task {
                    quest_id: id.to_string(),
                    ..t
                })
                .collect(),
            created_at: None,
            created_by: None,
        }
    }

    fn city_tasks() -> Vec<Task> {
        let mut choice = task("mc", TaskKind::MultipleChoice, 10, 0);
        choice.options = Some(vec!["Lenin Square".to_string(), "Labor Square".to_string()]);
        choice.correct_answer = Some("Lenin Square".to_string());
        vec![
            choice,
            task("photo", TaskKind::PhotoSubmission, 20, 1),
            task("checkin", TaskKind::LocationCheckIn, 5, 2),
            task("partner", TaskKind::PartnerVisit, 15, 3),
        ]
    }

    fn answers() -> Vec<(&'static str, TaskAnswer)> {
        vec![
            ("mc", TaskAnswer::Text("Lenin Square".to_string())),
            (
                "photo",
                TaskAnswer::Photo(UploadFile::new("dam.jpg", "image/jpeg", vec![1, 2, 3])),
            ),
            ("checkin", TaskAnswer::None),
            ("partner", TaskAnswer::None),
        ]
    }

    async fn signed_in(memory: &Arc<MemoryService>) -> String {
        let id = memory.add_account("a@b.c", "secret", "walker");
        memory.sign_in("a@b.c", "secret").await.unwrap();
        id
    }

    async fn started(memory: &Arc<MemoryService>) -> QuestStore {
        memory.add_quest(quest("q1", city_tasks()));
        let store = QuestStore::new(memory.clone(), "task-photos");
        store.fetch_quest_by_id("q1").await.unwrap();
        store.start_quest("q1").await.unwrap();
        store
    }

    fn progress_of(store: &QuestStore) -> QuestProgress {
        store.snapshot().run.progress().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_index_and_points_track_completed_tasks() {
        let memory = Arc::new(MemoryService::new());
        let user_id = signed_in(&memory).await;
        let store = started(&memory).await;
        let tasks = city_tasks();

        assert_eq!(progress_of(&store).current_task_index, 0);
        assert_eq!(progress_of(&store).points_earned, 0);

        for (n, (task_id, answer)) in answers().into_iter().enumerate() {
            store.complete_task(task_id, answer).await.unwrap();
            let progress = progress_of(&store);
            let expected: i64 = tasks[..=n].iter().map(|t| t.points).sum();
            assert_eq!(progress.current_task_index, n + 1);
            assert_eq!(progress.points_earned, expected);
            assert_eq!(memory.stored_progress(&user_id, "q1").unwrap(), progress);
        }

        assert!(matches!(store.snapshot().run, QuestRun::ReadyToSubmit { .. }));
        assert_eq!(memory.object_keys().len(), 1);
        assert!(memory.object_keys()[0].starts_with(&format!("task-photos/{}/q1/photo-", user_id)));
    }

    #[tokio::test]
    async fn test_wrong_answer_leaves_state_unchanged() {
        let memory = Arc::new(MemoryService::new());
        signed_in(&memory).await;
        let store = started(&memory).await;
        let before = progress_of(&store);

        let err = store
            .complete_task("mc", TaskAnswer::Text("lenin square".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, AppError::TaskValidationFailed);
        assert_eq!(progress_of(&store), before);
        assert_eq!(store.snapshot().error.as_deref(), Some("Task validation failed"));
        assert_eq!(memory.call_count("update_progress"), 0);

        // retry with the right answer clears the error
        store
            .complete_task("mc", TaskAnswer::Text("Lenin Square".to_string()))
            .await
            .unwrap();
        assert!(store.snapshot().error.is_none());
        assert_eq!(progress_of(&store).current_task_index, 1);
    }

    #[tokio::test]
    async fn test_photo_task_needs_a_file() {
        let memory = Arc::new(MemoryService::new());
        signed_in(&memory).await;
        let store = started(&memory).await;
        store
            .complete_task("mc", TaskAnswer::Text("Lenin Square".to_string()))
            .await
            .unwrap();

        let err = store.complete_task("photo", TaskAnswer::None).await.unwrap_err();
        assert_eq!(err, AppError::TaskValidationFailed);
        assert_eq!(progress_of(&store).current_task_index, 1);
        assert_eq!(memory.call_count("upload_object"), 0);
    }

    #[tokio::test]
    async fn test_only_the_current_task_can_be_completed() {
        let memory = Arc::new(MemoryService::new());
        signed_in(&memory).await;
        let store = started(&memory).await;

        let err = store.complete_task("checkin", TaskAnswer::None).await.unwrap_err();
        assert_eq!(
            err,
            AppError::TaskMismatch {
                expected: "mc".to_string(),
                got: "checkin".to_string()
            }
        );
        assert_eq!(progress_of(&store).current_task_index, 0);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_advance() {
        let memory = Arc::new(MemoryService::new());
        signed_in(&memory).await;
        let store = started(&memory).await;

        memory.fail("update_progress");
        let answer = TaskAnswer::Text("Lenin Square".to_string());
        assert!(matches!(
            store.complete_task("mc", answer.clone()).await,
            Err(AppError::Remote(_))
        ));
        assert_eq!(progress_of(&store).current_task_index, 0);
        assert_eq!(progress_of(&store).points_earned, 0);

        memory.recover("update_progress");
        store.complete_task("mc", answer).await.unwrap();
        assert_eq!(progress_of(&store).current_task_index, 1);
    }

    #[tokio::test]
    async fn test_concurrent_write_is_detected() {
        let memory = Arc::new(MemoryService::new());
        let user_id = signed_in(&memory).await;
        let store = started(&memory).await;

        // another client moved the same run forward
        let mut elsewhere = memory.stored_progress(&user_id, "q1").unwrap();
        elsewhere.current_task_index = 1;
        elsewhere.revision = 1;
        memory.put_progress(elsewhere.clone());

        let err = store
            .complete_task("mc", TaskAnswer::Text("Lenin Square".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, AppError::StaleProgress);
        assert_eq!(memory.stored_progress(&user_id, "q1").unwrap(), elsewhere);
        assert_eq!(progress_of(&store).current_task_index, 0);

        // reloading picks up the other client's position
        store.fetch_quest_by_id("q1").await.unwrap();
        assert_eq!(progress_of(&store).current_task_index, 1);
    }

    #[tokio::test]
    async fn test_submit_records_completion_and_clears_progress() {
        let memory = Arc::new(MemoryService::new());
        let user_id = signed_in(&memory).await;
        let store = started(&memory).await;
        for (task_id, answer) in answers() {
            store.complete_task(task_id, answer).await.unwrap();
        }

        let started_at = progress_of(&store).started_at;
        let completion = store
            .submit_quest_at(started_at + Duration::minutes(47) + Duration::seconds(20))
            .await
            .unwrap();

        assert_eq!(completion.points_earned, 50);
        assert_eq!(completion.time_taken, 47);
        assert_eq!(completion.tasks_completed, 4);
        assert!(completion.id.is_some());

        assert!(memory.stored_progress(&user_id, "q1").is_none());
        assert_eq!(memory.stored_completions().len(), 1);
        assert_eq!(memory.stored_profile(&user_id).unwrap().points, 50);
        assert_eq!(store.snapshot().run, QuestRun::Completed(completion));

        let calls = memory.calls();
        let pos = |op: &str| calls.iter().position(|c| c == op).unwrap();
        assert!(pos("insert_completion") < pos("increment_user_points"));
        assert!(pos("increment_user_points") < pos("delete_progress"));
    }

    #[tokio::test]
    async fn test_unfinished_run_cannot_be_submitted() {
        let memory = Arc::new(MemoryService::new());
        let user_id = signed_in(&memory).await;
        let store = started(&memory).await;
        store
            .complete_task("mc", TaskAnswer::Text("Lenin Square".to_string()))
            .await
            .unwrap();

        let err = store.submit_quest().await.unwrap_err();
        assert!(matches!(err, AppError::Precondition(_)));
        assert_eq!(memory.call_count("insert_completion"), 0);
        assert!(memory.stored_completions().is_empty());
        assert!(memory.stored_progress(&user_id, "q1").is_some());
    }

    #[tokio::test]
    async fn test_failed_progress_delete_does_not_undo_submit() {
        let memory = Arc::new(MemoryService::new());
        signed_in(&memory).await;
        memory.add_quest(quest("empty", vec![]));
        let store = QuestStore::new(memory.clone(), "task-photos");
        store.fetch_quest_by_id("empty").await.unwrap();

        // no tasks: ready to submit straight away
        let run = store.start_quest("empty").await.unwrap();
        assert!(matches!(run, QuestRun::ReadyToSubmit { .. }));

        memory.fail("delete_progress");
        let completion = store.submit_quest().await.unwrap();
        assert_eq!(completion.points_earned, 0);
        assert!(matches!(store.snapshot().run, QuestRun::Completed(_)));
        assert!(store.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_actions_require_a_session() {
        let memory = Arc::new(MemoryService::new());
        memory.add_quest(quest("q1", city_tasks()));
        let store = QuestStore::new(memory.clone(), "task-photos");
        store.fetch_quest_by_id("q1").await.unwrap();
        assert_eq!(memory.call_count("get_progress"), 0);

        let before = memory.calls().len();
        assert_eq!(store.start_quest("q1").await.unwrap_err(), AppError::NotAuthenticated);
        assert_eq!(
            store.complete_task("mc", TaskAnswer::None).await.unwrap_err(),
            AppError::NotAuthenticated
        );
        assert_eq!(store.submit_quest().await.unwrap_err(), AppError::NotAuthenticated);
        assert_eq!(memory.calls().len(), before);
    }

    #[tokio::test]
    async fn test_start_requires_loaded_quest() {
        let memory = Arc::new(MemoryService::new());
        signed_in(&memory).await;
        memory.add_quest(quest("q1", city_tasks()));
        let store = QuestStore::new(memory.clone(), "task-photos");

        assert!(matches!(
            store.start_quest("q1").await,
            Err(AppError::Precondition(_))
        ));
        assert_eq!(memory.call_count("upsert_progress"), 0);
    }

    #[tokio::test]
    async fn test_fetch_quests_loads_tasks() {
        let memory = Arc::new(MemoryService::new());
        memory.add_quest(quest("q1", city_tasks()));
        memory.add_quest(quest("q2", vec![task("only", TaskKind::LocationCheckIn, 5, 0)]));
        let store = QuestStore::new(memory.clone(), "task-photos");

        let quests = store.fetch_quests().await.unwrap();
        assert_eq!(quests.len(), 2);
        assert_eq!(quests[0].tasks.len(), 4);
        assert_eq!(quests[1].tasks[0].id, "only");
        assert_eq!(store.snapshot().quests, quests);
        assert_eq!(memory.call_count("list_tasks"), 2);
    }

    #[tokio::test]
    async fn test_unknown_quest_is_not_found() {
        let memory = Arc::new(MemoryService::new());
        let store = QuestStore::new(memory.clone(), "task-photos");
        assert_eq!(
            store.fetch_quest_by_id("nope").await.unwrap_err(),
            AppError::NotFound("Quest".to_string())
        );
        assert_eq!(store.snapshot().error.as_deref(), Some("Quest not found"));
    }

    #[tokio::test]
    async fn test_reset_abandons_run() {
        let memory = Arc::new(MemoryService::new());
        let user_id = signed_in(&memory).await;
        let store = started(&memory).await;

        store.reset_quest_progress().await.unwrap();
        assert_eq!(store.snapshot().run, QuestRun::NotStarted);
        assert!(memory.stored_progress(&user_id, "q1").is_none());
    }

    #[tokio::test]
    async fn test_run_of_previous_user_is_not_written() {
        let memory = Arc::new(MemoryService::new());
        let alice = signed_in(&memory).await;
        let store = started(&memory).await;

        let bob = memory.add_account("bob@b.c", "secret", "bob");
        memory.sign_in("bob@b.c", "secret").await.unwrap();

        let answer = TaskAnswer::Text("Lenin Square".to_string());
        assert!(matches!(
            store.complete_task("mc", answer.clone()).await,
            Err(AppError::Precondition(_))
        ));
        assert!(matches!(store.submit_quest().await, Err(AppError::Precondition(_))));
        assert!(matches!(store.reset_quest_progress().await, Err(AppError::Precondition(_))));
        assert_eq!(memory.call_count("update_progress"), 0);
        assert_eq!(memory.stored_progress(&alice, "q1").unwrap().current_task_index, 0);
        assert!(memory.stored_progress(&bob, "q1").is_none());

        // after clearing, the quest reloads for the new session
        store.clear_run();
        assert!(!store.is_current("q1"));
        store.fetch_quest_by_id("q1").await.unwrap();
        assert_eq!(store.snapshot().run, QuestRun::NotStarted);
        store.start_quest("q1").await.unwrap();
        store.complete_task("mc", answer).await.unwrap();
        assert_eq!(memory.stored_progress(&bob, "q1").unwrap().current_task_index, 1);
        assert_eq!(memory.stored_progress(&alice, "q1").unwrap().current_task_index, 0);
    }

    #[tokio::test]
    async fn test_retry_after_failed_points_credit_stores_one_completion() {
        let memory = Arc::new(MemoryService::new());
        let user_id = signed_in(&memory).await;
        let store = started(&memory).await;
        for (task_id, answer) in answers() {
            store.complete_task(task_id, answer).await.unwrap();
        }

        memory.fail("increment_user_points");
        assert!(matches!(store.submit_quest().await, Err(AppError::Remote(_))));
        assert_eq!(memory.stored_completions().len(), 1);
        let recorded = match store.snapshot().run {
            QuestRun::ReadyToSubmit { recorded, .. } => recorded,
            other => panic!("unexpected run {:?}", other),
        };
        assert_eq!(recorded.as_ref(), memory.stored_completions().first());

        memory.recover("increment_user_points");
        let completion = store.submit_quest().await.unwrap();
        assert_eq!(Some(completion.clone()), recorded);
        assert_eq!(memory.stored_completions().len(), 1);
        assert_eq!(memory.call_count("insert_completion"), 1);
        assert_eq!(memory.stored_profile(&user_id).unwrap().points, 50);
        assert_eq!(store.snapshot().run, QuestRun::Completed(completion));
    }
}
