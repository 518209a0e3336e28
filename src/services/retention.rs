use crate::config::RetentionConfig;
use crate::db::repositories::DetectionStore;
use anyhow::Result;
use chrono::Utc;
use log::{error, info};
use std::sync::Arc;
use tokio::time::{interval, Duration};

/// Periodically deletes detection events older than the configured age
pub struct RetentionService {
    config: RetentionConfig,
    store: Arc<dyn DetectionStore>,
}

impl RetentionService {
    pub fn new(config: RetentionConfig, store: Arc<dyn DetectionStore>) -> Self {
        Self { config, store }
    }

    /// Start the cleanup loop in the background
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if !self.config.enabled {
            info!("Detection retention is disabled, events are kept forever");
            return Ok(());
        }

        self.config.cutoff(Utc::now())?;

        info!(
            "Starting detection retention: max age {} days, checking every {} seconds",
            self.config.max_age_days, self.config.check_interval_secs
        );

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(self.config.check_interval_secs.max(1)));

            loop {
                interval.tick().await;

                if let Err(e) = self.run_cleanup().await {
                    error!("Error running detection retention: {:#}", e);
                }
            }
        });

        Ok(())
    }

    /// Delete expired events once, returning how many were removed
    pub async fn run_cleanup(&self) -> Result<u64> {
        let cutoff = self.config.cutoff(Utc::now())?;
        let deleted = self.store.delete_older_than(cutoff).await?;

        if deleted > 0 {
            info!("Deleted {} detection events older than {}", deleted, cutoff);
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use crate::db::models::detection_models::NewDetection;
    use crate::db::repositories::MemoryDetectionStore;

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_events() -> Result<()> {
        let store = Arc::new(MemoryDetectionStore::new());
        let now = Utc::now();
        store
            .insert(&NewDetection::now("animal", 0.9).at(now - ChronoDuration::days(45)))
            .await?;
        store
            .insert(&NewDetection::now("fire", 0.9).at(now - ChronoDuration::days(2)))
            .await?;

        let service = RetentionService::new(
            RetentionConfig {
                enabled: true,
                max_age_days: 30,
                check_interval_secs: 3600,
            },
            store.clone(),
        );

        assert_eq!(service.run_cleanup().await?, 1);
        assert_eq!(service.run_cleanup().await?, 0);

        let remaining = store.all().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].class_name, "fire");
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_range_age_is_reported() {
        let store = Arc::new(MemoryDetectionStore::new());
        let service = Arc::new(RetentionService::new(
            RetentionConfig {
                enabled: true,
                max_age_days: u32::MAX,
                check_interval_secs: 3600,
            },
            store,
        ));

        assert!(service.run_cleanup().await.is_err());
        assert!(service.start().await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_service_deletes_nothing() -> Result<()> {
        let store = Arc::new(MemoryDetectionStore::new());
        store
            .insert(&NewDetection::now("animal", 0.9).at(Utc::now() - ChronoDuration::days(400)))
            .await?;

        Arc::new(RetentionService::new(RetentionConfig::default(), store.clone()))
            .start()
            .await?;
        tokio::task::yield_now().await;

        assert_eq!(store.len().await, 1);
        Ok(())
    }
}
