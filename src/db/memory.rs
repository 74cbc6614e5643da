use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use super::{
    CriterionRepository, SectionRepository, StoreError, UserMasteryRepository,
    UserPreferencesProvider,
};
use crate::types::{
    BlueprintSection, CriterionUpdate, MasteryCriterion, MasteryThresholdTier, TrackingIntensity,
    UserCriterionMastery, UserSchedulingPreferences, UueStage,
};

type MasteryKey = (String, String);

/// Process-local store backing every repository trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    criteria: RwLock<HashMap<String, MasteryCriterion>>,
    masteries: RwLock<HashMap<MasteryKey, UserCriterionMastery>>,
    sections: RwLock<HashMap<String, BlueprintSection>>,
    preferences: RwLock<HashMap<String, UserSchedulingPreferences>>,
    section_tiers: RwLock<HashMap<MasteryKey, MasteryThresholdTier>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_section(&self, section: BlueprintSection) {
        self.sections.write().insert(section.id.clone(), section);
    }

    pub fn set_preferences(&self, user_id: &str, preferences: UserSchedulingPreferences) {
        self.preferences
            .write()
            .insert(user_id.to_string(), preferences);
    }

    pub fn set_section_threshold(
        &self,
        user_id: &str,
        section_id: &str,
        tier: MasteryThresholdTier,
    ) {
        self.section_tiers
            .write()
            .insert((user_id.to_string(), section_id.to_string()), tier);
    }

    /// Overwrites a mastery record, bumping its version past whatever is stored.
    pub fn put_mastery(&self, mut record: UserCriterionMastery) -> UserCriterionMastery {
        let key = (record.user_id.clone(), record.criterion_id.clone());
        let mut masteries = self.masteries.write();
        let stored_version = masteries.get(&key).map(|r| r.version).unwrap_or(0);
        record.version = record.version.max(stored_version) + 1;
        masteries.insert(key, record.clone());
        record
    }

    fn records_for_user<F>(&self, user_id: &str, keep: F) -> Vec<UserCriterionMastery>
    where
        F: Fn(&UserCriterionMastery) -> bool,
    {
        let mut records: Vec<UserCriterionMastery> = self
            .masteries
            .read()
            .values()
            .filter(|r| r.user_id == user_id && keep(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.next_review_at
                .cmp(&b.next_review_at)
                .then_with(|| a.criterion_id.cmp(&b.criterion_id))
        });
        records
    }
}

#[async_trait]
impl CriterionRepository for MemoryStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<MasteryCriterion>, StoreError> {
        Ok(self.criteria.read().get(id).cloned())
    }

    async fn list_by_stage_and_section(
        &self,
        section_id: &str,
        stage: UueStage,
    ) -> Result<Vec<MasteryCriterion>, StoreError> {
        let mut criteria: Vec<MasteryCriterion> = self
            .criteria
            .read()
            .values()
            .filter(|c| c.section_id == section_id && c.uue_stage == stage)
            .cloned()
            .collect();
        criteria.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(criteria)
    }

    async fn create(&self, criterion: MasteryCriterion) -> Result<MasteryCriterion, StoreError> {
        criterion.validate().map_err(StoreError::Invalid)?;
        let mut criteria = self.criteria.write();
        if criteria.contains_key(&criterion.id) {
            return Err(StoreError::Invalid(format!(
                "criterion {} already exists",
                criterion.id
            )));
        }
        criteria.insert(criterion.id.clone(), criterion.clone());
        Ok(criterion)
    }

    async fn update(
        &self,
        id: &str,
        update: CriterionUpdate,
    ) -> Result<MasteryCriterion, StoreError> {
        let mut criteria = self.criteria.write();
        let existing = criteria
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("criterion {id}")))?;
        let mut next = existing.clone();
        update.apply(&mut next).map_err(StoreError::Invalid)?;
        *existing = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        if self.criteria.write().remove(id).is_none() {
            return Err(StoreError::NotFound(format!("criterion {id}")));
        }
        self.masteries
            .write()
            .retain(|(_, criterion_id), _| criterion_id != id);
        Ok(())
    }
}

#[async_trait]
impl UserMasteryRepository for MemoryStore {
    async fn get(
        &self,
        user_id: &str,
        criterion_id: &str,
    ) -> Result<Option<UserCriterionMastery>, StoreError> {
        let key = (user_id.to_string(), criterion_id.to_string());
        Ok(self.masteries.read().get(&key).cloned())
    }

    async fn get_or_create_default(
        &self,
        user_id: &str,
        criterion: &MasteryCriterion,
        intensity: TrackingIntensity,
    ) -> Result<UserCriterionMastery, StoreError> {
        let key = (user_id.to_string(), criterion.id.clone());
        let record = self
            .masteries
            .write()
            .entry(key)
            .or_insert_with(|| UserCriterionMastery::new(user_id, criterion, intensity))
            .clone();
        Ok(record)
    }

    async fn update(
        &self,
        record: &UserCriterionMastery,
    ) -> Result<UserCriterionMastery, StoreError> {
        let key = (record.user_id.clone(), record.criterion_id.clone());
        let mut masteries = self.masteries.write();
        let stored = masteries.get_mut(&key).ok_or_else(|| {
            StoreError::NotFound(format!(
                "mastery {}/{}",
                record.user_id, record.criterion_id
            ))
        })?;

        if stored.version != record.version {
            return Err(StoreError::Conflict {
                user_id: record.user_id.clone(),
                criterion_id: record.criterion_id.clone(),
                expected: record.version,
                found: stored.version,
            });
        }

        let mut next = record.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_due(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<UserCriterionMastery>, StoreError> {
        Ok(self.records_for_user(user_id, |r| {
            r.next_review_at.is_some_and(|at| at <= as_of)
        }))
    }

    async fn list_overdue(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
        grace_days: i64,
    ) -> Result<Vec<UserCriterionMastery>, StoreError> {
        let Some(cutoff) =
            Duration::try_days(grace_days).and_then(|grace| as_of.checked_sub_signed(grace))
        else {
            return Ok(Vec::new());
        };
        Ok(self.records_for_user(user_id, |r| {
            r.next_review_at.is_some_and(|at| at <= cutoff)
        }))
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserCriterionMastery>, StoreError> {
        Ok(self.records_for_user(user_id, |_| true))
    }
}

#[async_trait]
impl SectionRepository for MemoryStore {
    async fn list_sections(&self, ids: &[String]) -> Result<Vec<BlueprintSection>, StoreError> {
        let sections = self.sections.read();
        Ok(ids.iter().filter_map(|id| sections.get(id).cloned()).collect())
    }
}

#[async_trait]
impl UserPreferencesProvider for MemoryStore {
    async fn get(&self, user_id: &str) -> Result<UserSchedulingPreferences, StoreError> {
        Ok(self
            .preferences
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn section_threshold(
        &self,
        user_id: &str,
        section_id: &str,
    ) -> Result<Option<MasteryThresholdTier>, StoreError> {
        let key = (user_id.to_string(), section_id.to_string());
        Ok(self.section_tiers.read().get(&key).copied())
    }
}
