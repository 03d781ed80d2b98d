// Models module

pub mod leaderboard;
pub mod progress;
pub mod quest;
pub mod upload;
pub mod user;

pub use leaderboard::{rank_rows, LeaderboardEntry, LeaderboardPeriod, LeaderboardRow, LeaderboardSort};
pub use progress::{QuestCompletion, QuestProgress, QuestRun};
pub use quest::{Difficulty, GeoPoint, Quest, Task, TaskKind};
pub use upload::{TaskAnswer, UploadFile, UploadedObject};
pub use user::{AuthUser, NewProfile, ProfilePatch, Session, UserMetadata, UserProfile, UserStatus};
