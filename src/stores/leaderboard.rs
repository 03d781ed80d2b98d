// Leaderboard store

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use super::{Observable, ViewState};
use crate::error::AppResult;
use crate::models::{rank_rows, LeaderboardEntry, LeaderboardPeriod, LeaderboardSort};
use crate::services::DataService;

#[derive(Debug, Clone, Default, Serialize)]
pub struct LeaderboardSnapshot {
    pub entries: Vec<LeaderboardEntry>,
    pub period: LeaderboardPeriod,
    pub sort_by: LeaderboardSort,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl ViewState for LeaderboardSnapshot {
    fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }

    fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }
}

pub struct LeaderboardStore {
    data: Arc<dyn DataService>,
    view: Observable<LeaderboardSnapshot>,
}

impl LeaderboardStore {
    pub fn new(data: Arc<dyn DataService>) -> Self {
        Self {
            data,
            view: Observable::new(LeaderboardSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> LeaderboardSnapshot {
        self.view.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<LeaderboardSnapshot> {
        self.view.subscribe()
    }

    /// Fetch for the current period and sort. Ranks follow the returned order.
    /// On failure the previous entries stay in place.
    pub async fn fetch_leaderboard(&self) -> AppResult<Vec<LeaderboardEntry>> {
        self.view.begin();
        let LeaderboardSnapshot { period, sort_by, .. } = self.view.snapshot();

        let result = self
            .data
            .get_leaderboard(period, sort_by)
            .await
            .map(rank_rows);

        match &result {
            Ok(entries) => {
                tracing::info!(
                    "Leaderboard {} by {}: {} entries",
                    period.as_str(),
                    sort_by.as_str(),
                    entries.len()
                );
                let entries = entries.clone();
                self.view.update(|s| s.entries = entries);
            }
            Err(e) => tracing::error!("Error fetching leaderboard: {}", e),
        }
        self.view.finish(result)
    }

    /// Change the period and refetch
    pub async fn set_period(&self, period: LeaderboardPeriod) -> AppResult<Vec<LeaderboardEntry>> {
        self.select(Some(period), None).await
    }

    /// Change the sort key and refetch
    pub async fn set_sort_by(&self, sort_by: LeaderboardSort) -> AppResult<Vec<LeaderboardEntry>> {
        self.select(None, Some(sort_by)).await
    }

    /// Change either part of the selection, then fetch once
    pub async fn select(
        &self,
        period: Option<LeaderboardPeriod>,
        sort_by: Option<LeaderboardSort>,
    ) -> AppResult<Vec<LeaderboardEntry>> {
        self.view.update(|s| {
            if let Some(period) = period {
                s.period = period;
            }
            if let Some(sort_by) = sort_by {
                s.sort_by = sort_by;
            }
        });
        self.fetch_leaderboard().await
    }
}
