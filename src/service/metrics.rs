//! Achievement metrics over uploads and run history

use crate::persistence::{RunStore, TargetStore};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementMetrics {
    /// Rows uploaded so far
    pub total_uploads: u64,
    /// Rows in the pipeline's derived table
    pub total_processed: u64,
    /// Percentage of runs that succeeded, two decimals
    pub success_rate: f64,
    pub total_runs: u64,
    pub success_count: u64,
    pub latest_status: String,
    pub latest_duration: Option<f64>,
}

impl Default for AchievementMetrics {
    fn default() -> Self {
        Self {
            total_uploads: 0,
            total_processed: 0,
            success_rate: 0.0,
            total_runs: 0,
            success_count: 0,
            latest_status: "N/A".to_string(),
            latest_duration: None,
        }
    }
}

/// Percentage rounded to two decimals; 0 when there are no runs
pub fn success_rate(success: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let rate = success as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Gather metrics. Each figure degrades to its default on error.
pub async fn collect(
    runs: &dyn RunStore,
    targets: &dyn TargetStore,
    processed_table: &str,
) -> AchievementMetrics {
    let mut metrics = AchievementMetrics::default();

    match targets.count_targets().await {
        Ok(count) => metrics.total_uploads = count,
        Err(e) => warn!("Could not count uploaded rows: {}", e),
    }

    match targets.count_processed(processed_table).await {
        Ok(count) => metrics.total_processed = count,
        Err(e) => warn!("Could not count rows in {}: {}", processed_table, e),
    }

    match runs.counts().await {
        Ok(counts) => {
            metrics.total_runs = counts.total;
            metrics.success_count = counts.success;
            metrics.success_rate = success_rate(counts.success, counts.total);
        }
        Err(e) => warn!("Could not count pipeline runs: {}", e),
    }

    match runs.latest().await {
        Ok(Some(run)) => {
            metrics.latest_status = run.status.to_string();
            metrics.latest_duration = run.duration_seconds;
        }
        Ok(None) => {}
        Err(e) => warn!("Could not load latest pipeline run: {}", e),
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunCompletion, RunUpdate, TriggerSource};
    use crate::persistence::InMemoryStore;

    #[test]
    fn test_success_rate_rounding() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(1, 3), 33.33);
        assert_eq!(success_rate(2, 3), 66.67);
        assert_eq!(success_rate(4, 4), 100.0);
    }

    #[tokio::test]
    async fn test_collect_from_store() {
        let store = InMemoryStore::new();
        store.set_processed("user_targets_clean", 12).await;

        let run = store.create(TriggerSource::Upload).await.unwrap();
        store.update(run.id, RunUpdate::Running).await.unwrap();
        store
            .update(run.id, RunUpdate::Finished(RunCompletion::success(String::new(), 4.0)))
            .await
            .unwrap();

        let metrics = collect(&store, &store, "user_targets_clean").await;
        assert_eq!(metrics.total_processed, 12);
        assert_eq!(metrics.total_runs, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.success_rate, 100.0);
        assert_eq!(metrics.latest_status, "success");
        assert_eq!(metrics.latest_duration, Some(4.0));
    }

    #[tokio::test]
    async fn test_collect_degrades_when_unprovisioned() {
        let store = InMemoryStore::unprovisioned();
        let metrics = collect(&store, &store, "user_targets_clean").await;
        assert_eq!(metrics, AchievementMetrics::default());
    }
}
