// Quest progress models
// Tables: quest_progress (one row per user+quest while a run is open),
//         quest_completions (append-only history)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Task;

/// Transient per-user record of how far into a quest the user has advanced
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestProgress {
    pub user_id: String,
    pub quest_id: String,
    /// Zero-based index of the next task to complete
    pub current_task_index: usize,
    pub started_at: DateTime<Utc>,
    /// Ids of completed tasks; membership only
    #[serde(default)]
    pub tasks_completed: Vec<String>,
    #[serde(default)]
    pub points_earned: i64,
    /// Bumped on every update; writes carry the revision they were based on
    #[serde(default)]
    pub revision: i64,
}

impl QuestProgress {
    pub fn start(user_id: &str, quest_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            quest_id: quest_id.to_string(),
            current_task_index: 0,
            started_at,
            tasks_completed: Vec::new(),
            points_earned: 0,
            revision: 0,
        }
    }

    /// Record `task` as done and move to the next one
    pub fn advanced(&self, task: &Task) -> Self {
        let mut next = self.clone();
        next.current_task_index += 1;
        if !next.tasks_completed.iter().any(|id| id == &task.id) {
            next.tasks_completed.push(task.id.clone());
            next.points_earned += task.points;
        }
        next.revision += 1;
        next
    }

    /// Whole minutes between start and `at`, rounded half up
    pub fn minutes_elapsed(&self, at: DateTime<Utc>) -> i64 {
        let ms = (at - self.started_at).num_milliseconds() as f64;
        (ms / 60000.0 + 0.5).floor() as i64
    }
}

/// Permanent record that a user finished a quest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestCompletion {
    /// Assigned by the data service on insert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub quest_id: String,
    pub completed_at: DateTime<Utc>,
    pub points_earned: i64,
    /// Minutes between start and completion
    pub time_taken: i64,
    pub tasks_completed: i64,
}

impl QuestCompletion {
    pub fn from_progress(progress: &QuestProgress, completed_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            user_id: progress.user_id.clone(),
            quest_id: progress.quest_id.clone(),
            completed_at,
            points_earned: progress.points_earned,
            time_taken: progress.minutes_elapsed(completed_at),
            tasks_completed: progress.tasks_completed.len() as i64,
        }
    }
}

/// Where the signed-in user stands on the currently loaded quest.
///
/// `InProgress` always holds an index below the task count; a run whose
/// index reached the count is `ReadyToSubmit`. Once a submit has stored the
/// completion, `recorded` holds it so a retried submit does not store it again.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuestRun {
    #[default]
    NotStarted,
    InProgress(QuestProgress),
    ReadyToSubmit {
        progress: QuestProgress,
        #[serde(skip_serializing_if = "Option::is_none")]
        recorded: Option<QuestCompletion>,
    },
    Completed(QuestCompletion),
}

impl QuestRun {
    /// Classify a stored progress record against the quest's task count
    pub fn resume(progress: QuestProgress, task_count: usize) -> Self {
        if progress.current_task_index < task_count {
            QuestRun::InProgress(progress)
        } else {
            if progress.current_task_index > task_count {
                tracing::warn!(
                    "Progress for quest {} points past the last task ({} > {})",
                    progress.quest_id,
                    progress.current_task_index,
                    task_count
                );
            }
            QuestRun::ReadyToSubmit {
                progress,
                recorded: None,
            }
        }
    }

    pub fn progress(&self) -> Option<&QuestProgress> {
        match self {
            QuestRun::InProgress(p) | QuestRun::ReadyToSubmit { progress: p, .. } => Some(p),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QuestRun::NotStarted => "not_started",
            QuestRun::InProgress(_) => "in_progress",
            QuestRun::ReadyToSubmit { .. } => "ready_to_submit",
            QuestRun::Completed(_) => "completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quest::tests::task;
    use crate::models::TaskKind;
    use chrono::Duration;

    fn started() -> QuestProgress {
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        QuestProgress::start("u1", "q1", at)
    }

    #[test]
    fn test_advance_accumulates_points() {
        let tasks = vec![
            task("a", TaskKind::LocationCheckIn, 10, 0),
            task("b", TaskKind::PartnerVisit, 25, 1),
            task("c", TaskKind::LocationCheckIn, 5, 2),
        ];

        let mut progress = started();
        for (n, t) in tasks.iter().enumerate() {
            progress = progress.advanced(t);
            assert_eq!(progress.current_task_index, n + 1);
            let expected: i64 = tasks[..=n].iter().map(|t| t.points).sum();
            assert_eq!(progress.points_earned, expected);
        }
        assert_eq!(progress.tasks_completed, vec!["a", "b", "c"]);
        assert_eq!(progress.revision, 3);
    }

    #[test]
    fn test_advance_does_not_count_a_task_twice() {
        let t = task("a", TaskKind::LocationCheckIn, 10, 0);
        let p = started().advanced(&t).advanced(&t);
        assert_eq!(p.tasks_completed.len(), 1);
        assert_eq!(p.points_earned, 10);
    }

    #[test]
    fn test_minutes_elapsed_rounds() {
        let p = started();
        assert_eq!(p.minutes_elapsed(p.started_at), 0);
        assert_eq!(p.minutes_elapsed(p.started_at + Duration::seconds(29)), 0);
        assert_eq!(p.minutes_elapsed(p.started_at + Duration::seconds(30)), 1);
        assert_eq!(p.minutes_elapsed(p.started_at + Duration::seconds(89)), 1);
        assert_eq!(p.minutes_elapsed(p.started_at + Duration::minutes(47)), 47);
    }

    #[test]
    fn test_completion_from_progress() {
        let t = task("a", TaskKind::LocationCheckIn, 40, 0);
        let p = started().advanced(&t);
        let c = QuestCompletion::from_progress(&p, p.started_at + Duration::minutes(12));
        assert_eq!(c.points_earned, 40);
        assert_eq!(c.time_taken, 12);
        assert_eq!(c.tasks_completed, 1);
        assert!(c.id.is_none());
    }

    #[test]
    fn test_resume_classifies_by_index() {
        let p = started();
        assert_eq!(QuestRun::resume(p.clone(), 2).name(), "in_progress");
        assert_eq!(QuestRun::resume(p.clone(), 0).name(), "ready_to_submit");

        let mut past = p;
        past.current_task_index = 5;
        assert!(matches!(QuestRun::resume(past, 3), QuestRun::ReadyToSubmit { .. }));
    }

    #[test]
    fn test_run_serializes_with_state_tag() {
        let json = serde_json::to_value(QuestRun::InProgress(started())).unwrap();
        assert_eq!(json["state"], "in_progress");
        assert_eq!(json["current_task_index"], 0);
        let json = serde_json::to_value(QuestRun::NotStarted).unwrap();
        assert_eq!(json["state"], "not_started");

        let json = serde_json::to_value(QuestRun::resume(started(), 0)).unwrap();
        assert_eq!(json["state"], "ready_to_submit");
        assert_eq!(json["progress"]["quest_id"], "q1");
        assert!(json.get("recorded").is_none());
    }
}
