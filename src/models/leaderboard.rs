// Leaderboard models
// Rows come from the get_leaderboard rpc already ordered

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaderboardPeriod {
    #[default]
    AllTime,
    Monthly,
    Weekly,
    Daily,
}

impl LeaderboardPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaderboardPeriod::AllTime => "all-time",
            LeaderboardPeriod::Monthly => "monthly",
            LeaderboardPeriod::Weekly => "weekly",
            LeaderboardPeriod::Daily => "daily",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardSort {
    #[default]
    Points,
    QuestsCompleted,
}

impl LeaderboardSort {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaderboardSort::Points => "points",
            LeaderboardSort::QuestsCompleted => "quests_completed",
        }
    }
}

/// Row as returned by the rpc; any rank it carries is ignored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardRow {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub quests_completed: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub points: i64,
    pub quests_completed: i64,
    /// 1-based position in the returned order
    pub rank: usize,
}

/// Assign ranks by position
pub fn rank_rows(rows: Vec<LeaderboardRow>) -> Vec<LeaderboardEntry> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| LeaderboardEntry {
            user_id: row.user_id,
            username: row.username,
            avatar_url: row.avatar_url,
            points: row.points,
            quests_completed: row.quests_completed,
            rank: i + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, points: i64, quests: i64) -> LeaderboardRow {
        LeaderboardRow {
            user_id: id.to_string(),
            username: id.to_string(),
            avatar_url: None,
            points,
            quests_completed: quests,
        }
    }

    #[test]
    fn test_rank_follows_returned_order() {
        // deliberately not sorted by points: the service order wins
        let entries = rank_rows(vec![row("a", 10, 5), row("b", 300, 1), row("c", 10, 2)]);
        let ranks: Vec<(&str, usize)> = entries.iter().map(|e| (e.user_id.as_str(), e.rank)).collect();
        assert_eq!(ranks, vec![("a", 1), ("b", 2), ("c", 3)]);
    }

    #[test]
    fn test_rank_ignores_service_rank() {
        let rows: Vec<LeaderboardRow> = serde_json::from_value(serde_json::json!([
            {"user_id": "x", "username": "x", "points": 1, "quests_completed": 0, "rank": 42}
        ]))
        .unwrap();
        assert_eq!(rank_rows(rows)[0].rank, 1);
    }

    #[test]
    fn test_query_values() {
        let p: LeaderboardPeriod = serde_json::from_str("\"all-time\"").unwrap();
        assert_eq!(p, LeaderboardPeriod::AllTime);
        assert_eq!(LeaderboardPeriod::Weekly.as_str(), "weekly");
        let s: LeaderboardSort = serde_json::from_str("\"quests_completed\"").unwrap();
        assert_eq!(s.as_str(), "quests_completed");
    }
}
