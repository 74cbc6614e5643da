pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    BlueprintSection, CriterionUpdate, MasteryCriterion, MasteryThresholdTier, TrackingIntensity,
    UserCriterionMastery, UserSchedulingPreferences, UueStage,
};

pub use memory::MemoryStore;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("version conflict on {user_id}/{criterion_id}: expected {expected}, found {found}")]
    Conflict {
        user_id: String,
        criterion_id: String,
        expected: u64,
        found: u64,
    },
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CriterionRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<MasteryCriterion>, StoreError>;

    async fn list_by_stage_and_section(
        &self,
        section_id: &str,
        stage: UueStage,
    ) -> Result<Vec<MasteryCriterion>, StoreError>;

    async fn create(&self, criterion: MasteryCriterion) -> Result<MasteryCriterion, StoreError>;

    async fn update(
        &self,
        id: &str,
        update: CriterionUpdate,
    ) -> Result<MasteryCriterion, StoreError>;

    /// Removes the criterion together with every mastery record that references it.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserMasteryRepository: Send + Sync {
    async fn get(
        &self,
        user_id: &str,
        criterion_id: &str,
    ) -> Result<Option<UserCriterionMastery>, StoreError>;

    async fn get_or_create_default(
        &self,
        user_id: &str,
        criterion: &MasteryCriterion,
        intensity: TrackingIntensity,
    ) -> Result<UserCriterionMastery, StoreError>;

    /// Compare-and-swap on `record.version`. Returns the stored record with its new version.
    async fn update(
        &self,
        record: &UserCriterionMastery,
    ) -> Result<UserCriterionMastery, StoreError>;

    /// Records with `next_review_at <= as_of`.
    async fn list_due(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<UserCriterionMastery>, StoreError>;

    /// Records whose `next_review_at` is at least `grace_days` before `as_of`.
    async fn list_overdue(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
        grace_days: i64,
    ) -> Result<Vec<UserCriterionMastery>, StoreError>;

    async fn list_for_user(&self, user_id: &str)
        -> Result<Vec<UserCriterionMastery>, StoreError>;

    async fn list_for_criteria(
        &self,
        user_id: &str,
        criterion_ids: &[String],
    ) -> Result<Vec<UserCriterionMastery>, StoreError> {
        let mut records = Vec::with_capacity(criterion_ids.len());
        for criterion_id in criterion_ids {
            if let Some(record) = self.get(user_id, criterion_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
pub trait SectionRepository: Send + Sync {
    async fn list_sections(&self, ids: &[String]) -> Result<Vec<BlueprintSection>, StoreError>;
}

#[async_trait]
pub trait UserPreferencesProvider: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<UserSchedulingPreferences, StoreError>;

    async fn section_threshold(
        &self,
        _user_id: &str,
        _section_id: &str,
    ) -> Result<Option<MasteryThresholdTier>, StoreError> {
        Ok(None)
    }
}
