use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::detection_models::{DetectionEvent, DetectionFilter, NewDetection};
use crate::db::models::user_models::User;

pub mod detections;
pub mod memory;
pub mod users;

pub use detections::DetectionsRepository;
pub use memory::{MemoryDetectionStore, MemoryUserStore};
pub use users::UsersRepository;

/// Default and maximum row counts of the admin listing
pub const DEFAULT_SEARCH_LIMIT: i64 = 100;
pub const MAX_SEARCH_LIMIT: i64 = 1000;

/// Storage of detection events
#[async_trait]
pub trait DetectionStore: Send + Sync {
    /// Persist one event and return it with its assigned id
    async fn insert(&self, detection: &NewDetection) -> Result<DetectionEvent>;

    /// Events at or after `cutoff`, newest first, at most `limit`
    async fn recent_since(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<DetectionEvent>>;

    /// Newest event whose class equals `class_name` ignoring case
    async fn latest_by_class(&self, class_name: &str) -> Result<Option<DetectionEvent>>;

    /// Filtered listing, newest first
    async fn search(&self, filter: &DetectionFilter) -> Result<Vec<DetectionEvent>>;

    /// Delete events older than `cutoff`, returning how many went away
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Whether the backing store answers
    async fn health_check(&self) -> bool;
}

/// Storage of dashboard accounts
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &User) -> Result<User>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn update_last_login(&self, id: &Uuid) -> Result<()>;

    async fn count(&self) -> Result<i64>;
}

impl DetectionFilter {
    /// Requested limit clamped to the listing bounds
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT)
    }

    pub(crate) fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref().filter(|s| !s.is_empty())
    }

    pub(crate) fn query(&self) -> Option<&str> {
        self.q.as_deref().filter(|s| !s.is_empty())
    }
}
