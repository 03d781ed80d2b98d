// View-state stores
//
// Each store owns one slice of session state behind a watch channel and
// exposes async actions that call the data service and write results back.

pub mod auth;
pub mod leaderboard;
pub mod quest;

use tokio::sync::watch;

use crate::error::AppResult;

pub use auth::{AuthSnapshot, AuthStore};
pub use leaderboard::{LeaderboardSnapshot, LeaderboardStore};
pub use quest::{QuestSnapshot, QuestStore};

/// Snapshot carrying the loading flag and the last error
pub trait ViewState: Clone {
    fn set_loading(&mut self, loading: bool);
    fn set_error(&mut self, error: Option<String>);
}

/// Observable snapshot holder shared by the stores
pub struct Observable<S> {
    tx: watch::Sender<S>,
}

impl<S: ViewState> Observable<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn snapshot(&self) -> S {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    pub fn update(&self, f: impl FnOnce(&mut S)) {
        self.tx.send_modify(f);
    }

    /// Start an action: set loading, clear the previous error
    pub fn begin(&self) {
        self.update(|s| {
            s.set_loading(true);
            s.set_error(None);
        });
    }

    /// End an action, keeping its error (if any) as the current one
    pub fn finish<T>(&self, result: AppResult<T>) -> AppResult<T> {
        self.update(|s| {
            s.set_loading(false);
            if let Err(e) = &result {
                s.set_error(Some(e.user_message()));
            }
        });
        result
    }
}
