//! In-process stores with the same ordering rules as the PostgreSQL repositories.
//! Used by tests and by anything that wants the dashboard without a database.

use crate::db::models::detection_models::{DetectionEvent, DetectionFilter, NewDetection};
use crate::db::models::user_models::User;
use crate::db::repositories::{DetectionStore, UserStore};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct DetectionTable {
    next_id: i64,
    rows: Vec<DetectionEvent>,
}

#[derive(Default)]
pub struct MemoryDetectionStore {
    table: RwLock<DetectionTable>,
}

impl MemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events
    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every stored event in insertion order
    pub async fn all(&self) -> Vec<DetectionEvent> {
        self.table.read().await.rows.clone()
    }
}

// ORDER BY timestamp DESC, id DESC
fn newest_first(a: &DetectionEvent, b: &DetectionEvent) -> Ordering {
    b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id))
}

fn newest_matching<F>(rows: &[DetectionEvent], limit: usize, pred: F) -> Vec<DetectionEvent>
where
    F: Fn(&DetectionEvent) -> bool,
{
    let mut matched: Vec<DetectionEvent> = rows.iter().filter(|e| pred(e)).cloned().collect();
    matched.sort_by(newest_first);
    matched.truncate(limit);
    matched
}

#[async_trait]
impl DetectionStore for MemoryDetectionStore {
    async fn insert(&self, detection: &NewDetection) -> Result<DetectionEvent> {
        let mut table = self.table.write().await;
        table.next_id += 1;

        let event = DetectionEvent {
            id: table.next_id,
            timestamp: detection.timestamp,
            class_name: detection.class_name.clone(),
            confidence: detection.confidence,
            bbox: detection.bbox,
            location: detection.location,
            raw: detection.raw.clone(),
        };
        table.rows.push(event.clone());

        Ok(event)
    }

    async fn recent_since(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<DetectionEvent>> {
        let table = self.table.read().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(newest_matching(&table.rows, limit, |e| e.timestamp >= cutoff))
    }

    async fn latest_by_class(&self, class_name: &str) -> Result<Option<DetectionEvent>> {
        let wanted = class_name.to_lowercase();
        let table = self.table.read().await;
        Ok(newest_matching(&table.rows, 1, |e| e.class_name.to_lowercase() == wanted)
            .into_iter()
            .next())
    }

    async fn search(&self, filter: &DetectionFilter) -> Result<Vec<DetectionEvent>> {
        let class_name = filter.class_name().map(str::to_lowercase);
        let query = filter.query().map(str::to_lowercase);
        let limit = usize::try_from(filter.effective_limit()).unwrap_or(0);

        let table = self.table.read().await;
        Ok(newest_matching(&table.rows, limit, |e| {
            let label = e.class_name.to_lowercase();
            class_name.as_deref().map_or(true, |c| label == c)
                && query.as_deref().map_or(true, |q| label.contains(q))
        }))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut table = self.table.write().await;
        let before = table.rows.len();
        table.rows.retain(|e| e.timestamp >= cutoff);
        Ok((before - table.rows.len()) as u64)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: &User) -> Result<User> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.username) {
            return Err(Error::AlreadyExists(format!("User {} already exists", user.username)).into());
        }
        users.insert(user.username.clone(), user.clone());
        Ok(user.clone())
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(username).cloned())
    }

    async fn update_last_login(&self, id: &Uuid) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .values_mut()
            .find(|u| u.id == *id)
            .ok_or_else(|| Error::NotFound(format!("User not found: {}", id)))?;
        user.last_login = Some(Utc::now());
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.users.read().await.len() as i64)
    }
}
