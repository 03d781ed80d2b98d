// Quest models - read-only reference data
// Tables: quests, tasks (tasks ordered by `order` within a quest)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskAnswer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A themed, ordered collection of location-bound tasks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quest {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub difficulty: Difficulty,
    /// Estimated duration in minutes
    #[serde(default)]
    pub estimated_time: i64,
    #[serde(default)]
    pub points_reward: i64,
    /// Not stored on the quest row; filled from the tasks table
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    MultipleChoice,
    PhotoSubmission,
    #[serde(rename = "location_checkin")]
    LocationCheckIn,
    PartnerVisit,
}

/// Task location with acceptance radius in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub radius: f64,
}

/// One step within a quest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub quest_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub location: GeoPoint,
    /// Multiple-choice options
    #[serde(default)]
    pub options: Option<Vec<String>>,
    /// Multiple-choice answer, compared case-sensitively
    #[serde(default)]
    pub correct_answer: Option<String>,
    /// Partner visited by a partner-visit task
    #[serde(default)]
    pub partner_id: Option<String>,
    pub points: i64,
    pub order: i64,
}

impl Task {
    /// Whether `answer` completes this task.
    ///
    /// Location check-ins and partner visits are accepted as-is; no geofence
    /// is evaluated here.
    pub fn accepts(&self, answer: &TaskAnswer) -> bool {
        match self.kind {
            TaskKind::MultipleChoice => match (answer, self.correct_answer.as_deref()) {
                (TaskAnswer::Text(given), Some(correct)) => given == correct,
                _ => false,
            },
            TaskKind::PhotoSubmission => match answer {
                TaskAnswer::Photo(file) => !file.bytes.is_empty(),
                _ => false,
            },
            TaskKind::LocationCheckIn | TaskKind::PartnerVisit => true,
        }
    }
}
