//! Typed access to the local timer state.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};

use crate::domain::{
    models::{
        ActiveTimer, ProgressKey, ProgressPatch, ProjectId, ReportPrefill, TaskProgress,
        WorkflowStatus,
    },
    ports::outbound::KeyValueStore,
    StoreError,
};

const ACTIVE_TIMER_KEY: &str = "active_timer";
const TASK_PROGRESS_KEY: &str = "task_progress";
const VIRTUAL_STATUS_KEY: &str = "virtual_status";
const STARTED_PROJECTS_KEY: &str = "started_projects";
const REPORT_PREFILL_KEY: &str = "report_prefill";

type ProgressMap = BTreeMap<ProgressKey, TaskProgress>;
type VirtualStatusMap = BTreeMap<ProjectId, WorkflowStatus>;

/// Local timer store on top of a [`KeyValueStore`].
///
/// Reads fail open: missing, unreadable or corrupted state is reported as
/// absent (no timer, default progress) and logged, never returned as an error.
pub struct LocalTimerStore<K> {
    kv: Arc<K>,
}

impl<K> Clone for LocalTimerStore<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
        }
    }
}

impl<K: KeyValueStore> LocalTimerStore<K> {
    pub fn new(kv: Arc<K>) -> Self {
        Self { kv }
    }

    async fn read<T: DeserializeOwned>(&self, key: &'static str) -> Option<T> {
        let raw = match self.kv.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, "failed to read local state, treating as absent: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, "discarding unreadable local state: {}", e);
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &'static str, value: &T) -> Result<(), StoreError> {
        let raw =
            serde_json::to_string(value).map_err(|source| StoreError::Encode { key, source })?;
        self.kv.put(key, &raw).await
    }

    // ========================================================================
    // Active timer
    // ========================================================================

    pub async fn load_active_timer(&self) -> Option<ActiveTimer> {
        self.read(ACTIVE_TIMER_KEY).await
    }

    pub async fn save_active_timer(&self, timer: &ActiveTimer) -> Result<(), StoreError> {
        self.write(ACTIVE_TIMER_KEY, timer).await
    }

    pub async fn clear_active_timer(&self) -> Result<(), StoreError> {
        self.kv.remove(ACTIVE_TIMER_KEY).await
    }

    // ========================================================================
    // Task progress
    // ========================================================================

    async fn progress_map(&self) -> ProgressMap {
        self.read(TASK_PROGRESS_KEY).await.unwrap_or_default()
    }

    /// Progress recorded for `key`, or the default if none was recorded.
    pub async fn get_progress(&self, key: &ProgressKey) -> TaskProgress {
        self.progress_map()
            .await
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    /// Merge `patch` into the progress of `key`, creating it if absent.
    pub async fn set_progress(
        &self,
        key: &ProgressKey,
        patch: ProgressPatch,
    ) -> Result<TaskProgress, StoreError> {
        let mut map = self.progress_map().await;
        let entry = map.entry(key.clone()).or_default();
        entry.apply(patch);
        let updated = *entry;
        self.write(TASK_PROGRESS_KEY, &map).await?;
        Ok(updated)
    }

    /// Add `ms` to the recorded time of `key`.
    pub async fn add_progress(&self, key: &ProgressKey, ms: u64) -> Result<TaskProgress, StoreError> {
        let mut map = self.progress_map().await;
        let entry = map.entry(key.clone()).or_default();
        entry.accumulated_ms = entry.accumulated_ms.saturating_add(ms);
        let updated = *entry;
        self.write(TASK_PROGRESS_KEY, &map).await?;
        Ok(updated)
    }

    pub async fn reset_progress(&self, key: &ProgressKey) -> Result<TaskProgress, StoreError> {
        self.set_progress(key, ProgressPatch::accumulated(0)).await
    }

    // ========================================================================
    // Virtual task status
    // ========================================================================

    /// Locally cached status of a project's virtual task, if one was set.
    pub async fn virtual_status(&self, project_id: &ProjectId) -> Option<WorkflowStatus> {
        self.read::<VirtualStatusMap>(VIRTUAL_STATUS_KEY)
            .await
            .and_then(|map| map.get(project_id).copied())
    }

    pub async fn virtual_statuses(&self) -> Vec<(ProjectId, WorkflowStatus)> {
        self.read::<VirtualStatusMap>(VIRTUAL_STATUS_KEY)
            .await
            .unwrap_or_default()
            .into_iter()
            .collect()
    }

    pub async fn set_virtual_status(
        &self,
        project_id: &ProjectId,
        status: WorkflowStatus,
    ) -> Result<(), StoreError> {
        let mut map: VirtualStatusMap = self.read(VIRTUAL_STATUS_KEY).await.unwrap_or_default();
        map.insert(project_id.clone(), status);
        self.write(VIRTUAL_STATUS_KEY, &map).await
    }

    // ========================================================================
    // Started projects
    // ========================================================================

    pub async fn started_projects(&self) -> BTreeSet<ProjectId> {
        self.read(STARTED_PROJECTS_KEY).await.unwrap_or_default()
    }

    pub async fn mark_project_started(&self, project_id: &ProjectId) -> Result<(), StoreError> {
        let mut started = self.started_projects().await;
        if started.insert(project_id.clone()) {
            self.write(STARTED_PROJECTS_KEY, &started).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Report prefill
    // ========================================================================

    pub async fn set_report_prefill(&self, prefill: &ReportPrefill) -> Result<(), StoreError> {
        self.write(REPORT_PREFILL_KEY, prefill).await
    }

    /// Take the pending report prefill, removing it from the store.
    pub async fn consume_report_prefill(&self) -> Result<Option<ReportPrefill>, StoreError> {
        let prefill = self.read(REPORT_PREFILL_KEY).await;
        self.kv.remove(REPORT_PREFILL_KEY).await?;
        Ok(prefill)
    }
}
