use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::db::models::detection_models::{AlertView, CategoryLocation};
use crate::db::repositories::DetectionStore;

/// How far back the alert feed looks
pub const ALERT_WINDOW_MINUTES: i64 = 30;

/// Most alerts returned by one request
pub const MAX_ALERTS: i64 = 200;

/// Categories summarized by the locations feed, in response order
pub const CATEGORIES: [&str; 4] = ["animal", "human", "fire", "poaching"];

/// Events of the last 30 minutes before `now`, newest first
pub async fn recent_alerts(store: &dyn DetectionStore, now: DateTime<Utc>) -> Result<Vec<AlertView>> {
    let cutoff = now - Duration::minutes(ALERT_WINDOW_MINUTES);
    let events = store.recent_since(cutoff, MAX_ALERTS).await?;

    Ok(events.iter().map(AlertView::from).collect())
}

/// Latest event of each category; categories never seen are left out
pub async fn latest_locations(store: &dyn DetectionStore) -> Result<Vec<CategoryLocation>> {
    let mut summaries = Vec::with_capacity(CATEGORIES.len());

    for category in CATEGORIES {
        if let Some(event) = store.latest_by_class(category).await? {
            summaries.push(CategoryLocation::new(category, &event));
        }
    }

    Ok(summaries)
}
