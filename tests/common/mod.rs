#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use mastery_engine::clock::FixedClock;
use mastery_engine::config::EngineConfig;
use mastery_engine::db::{CriterionRepository, MemoryStore, StoreError, UserMasteryRepository};
use mastery_engine::services::batch_review::BatchReviewOutcome;
use mastery_engine::types::{
    BlueprintSection, CriterionUpdate, MasteryCriterion, TrackingIntensity, UserCriterionMastery,
    UueStage,
};
use mastery_engine::{MasteryEngine, Repositories};

pub const USER: &str = "learner-1";
pub const SECTION: &str = "section-closures";

/// 2024-03-04T09:00:00Z, a Monday morning well clear of day boundaries.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
}

pub fn days(n: i64) -> Duration {
    Duration::days(n)
}

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub engine: MasteryEngine,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(base_time()));
        let engine = MasteryEngine::new(
            Repositories::in_memory(Arc::clone(&store)),
            clock.clone(),
            config,
        );
        Self {
            store,
            clock,
            engine,
        }
    }

    /// Same store, but mastery reads and writes go through `masteries`.
    pub fn with_masteries(
        masteries: Arc<dyn UserMasteryRepository>,
        store: Arc<MemoryStore>,
    ) -> Self {
        Self::with_repositories(store, |repos| repos.masteries = masteries)
    }

    /// In-memory repositories over `store`, adjusted by `customize` before the engine is built.
    pub fn with_repositories(
        store: Arc<MemoryStore>,
        customize: impl FnOnce(&mut Repositories),
    ) -> Self {
        let clock = Arc::new(FixedClock::new(base_time()));
        let mut repos = Repositories::in_memory(Arc::clone(&store));
        customize(&mut repos);
        let engine = MasteryEngine::new(repos, clock.clone(), EngineConfig::default());
        Self {
            store,
            clock,
            engine,
        }
    }

    pub fn advance_days(&self, n: i64) {
        self.clock.advance(days(n));
    }

    pub fn add_section(&self, id: &str, name: &str) {
        self.store.insert_section(BlueprintSection {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    pub async fn add_criterion(
        &self,
        id: &str,
        section_id: &str,
        stage: UueStage,
        weight: f64,
    ) -> MasteryCriterion {
        self.store
            .create(criterion(id, section_id, stage, weight))
            .await
            .expect("criterion should be created")
    }

    /// Stores a mastery record for `USER` directly, bypassing the tracker.
    pub fn put_record(
        &self,
        criterion: &MasteryCriterion,
        update: impl FnOnce(&mut UserCriterionMastery),
    ) -> UserCriterionMastery {
        let mut record = UserCriterionMastery::new(USER, criterion, TrackingIntensity::Normal);
        update(&mut record);
        self.store.put_mastery(record)
    }

    pub async fn record(&self, criterion_id: &str) -> UserCriterionMastery {
        UserMasteryRepository::get(self.store.as_ref(), USER, criterion_id)
            .await
            .expect("store read")
            .expect("mastery record should exist")
    }
}

pub fn criterion(id: &str, section_id: &str, stage: UueStage, weight: f64) -> MasteryCriterion {
    MasteryCriterion {
        id: id.to_string(),
        section_id: section_id.to_string(),
        uue_stage: stage,
        weight,
        mastery_threshold: 0.8,
        description: format!("describe {id}"),
        question_types: vec!["short_answer".to_string()],
    }
}

pub fn outcome(
    criterion_id: &str,
    is_correct: bool,
    confidence: f64,
    reviewed_at: DateTime<Utc>,
) -> BatchReviewOutcome {
    BatchReviewOutcome {
        criterion_id: criterion_id.to_string(),
        is_correct,
        confidence,
        time_spent_seconds: 40,
        reviewed_at,
        performance_score: None,
    }
}

/// Mastery repository that loses the first `conflicts` writes to a phantom concurrent writer.
pub struct ConflictingMasteries {
    inner: Arc<MemoryStore>,
    conflicts: AtomicU32,
}

impl ConflictingMasteries {
    pub fn new(inner: Arc<MemoryStore>, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts: AtomicU32::new(conflicts),
        }
    }

    pub fn remaining_conflicts(&self) -> u32 {
        self.conflicts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserMasteryRepository for ConflictingMasteries {
    async fn get(
        &self,
        user_id: &str,
        criterion_id: &str,
    ) -> Result<Option<UserCriterionMastery>, StoreError> {
        UserMasteryRepository::get(self.inner.as_ref(), user_id, criterion_id).await
    }

    async fn get_or_create_default(
        &self,
        user_id: &str,
        criterion: &MasteryCriterion,
        intensity: TrackingIntensity,
    ) -> Result<UserCriterionMastery, StoreError> {
        self.inner
            .get_or_create_default(user_id, criterion, intensity)
            .await
    }

    async fn update(
        &self,
        record: &UserCriterionMastery,
    ) -> Result<UserCriterionMastery, StoreError> {
        let lost_race = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost_race {
            return Err(StoreError::Conflict {
                user_id: record.user_id.clone(),
                criterion_id: record.criterion_id.clone(),
                expected: record.version,
                found: record.version + 1,
            });
        }
        UserMasteryRepository::update(self.inner.as_ref(), record).await
    }

    async fn list_due(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<UserCriterionMastery>, StoreError> {
        self.inner.list_due(user_id, as_of).await
    }

    async fn list_overdue(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
        grace_days: i64,
    ) -> Result<Vec<UserCriterionMastery>, StoreError> {
        self.inner.list_overdue(user_id, as_of, grace_days).await
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserCriterionMastery>, StoreError> {
        self.inner.list_for_user(user_id).await
    }
}

/// Mastery repository that yields to the scheduler before every call, like a networked store.
pub struct YieldingMasteries {
    inner: Arc<MemoryStore>,
}

impl YieldingMasteries {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl UserMasteryRepository for YieldingMasteries {
    async fn get(
        &self,
        user_id: &str,
        criterion_id: &str,
    ) -> Result<Option<UserCriterionMastery>, StoreError> {
        tokio::task::yield_now().await;
        UserMasteryRepository::get(self.inner.as_ref(), user_id, criterion_id).await
    }

    async fn get_or_create_default(
        &self,
        user_id: &str,
        criterion: &MasteryCriterion,
        intensity: TrackingIntensity,
    ) -> Result<UserCriterionMastery, StoreError> {
        tokio::task::yield_now().await;
        self.inner
            .get_or_create_default(user_id, criterion, intensity)
            .await
    }

    async fn update(
        &self,
        record: &UserCriterionMastery,
    ) -> Result<UserCriterionMastery, StoreError> {
        tokio::task::yield_now().await;
        UserMasteryRepository::update(self.inner.as_ref(), record).await
    }

    async fn list_due(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<UserCriterionMastery>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.list_due(user_id, as_of).await
    }

    async fn list_overdue(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
        grace_days: i64,
    ) -> Result<Vec<UserCriterionMastery>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.list_overdue(user_id, as_of, grace_days).await
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserCriterionMastery>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.list_for_user(user_id).await
    }
}

/// Criterion repository whose stage listing is down; single lookups still work.
pub struct StageListingDown {
    inner: Arc<MemoryStore>,
}

impl StageListingDown {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CriterionRepository for StageListingDown {
    async fn get_by_id(&self, id: &str) -> Result<Option<MasteryCriterion>, StoreError> {
        self.inner.get_by_id(id).await
    }

    async fn list_by_stage_and_section(
        &self,
        _section_id: &str,
        _stage: UueStage,
    ) -> Result<Vec<MasteryCriterion>, StoreError> {
        Err(StoreError::Backend("criteria index unavailable".to_string()))
    }

    async fn create(&self, criterion: MasteryCriterion) -> Result<MasteryCriterion, StoreError> {
        self.inner.create(criterion).await
    }

    async fn update(
        &self,
        id: &str,
        update: CriterionUpdate,
    ) -> Result<MasteryCriterion, StoreError> {
        CriterionRepository::update(self.inner.as_ref(), id, update).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        CriterionRepository::delete(self.inner.as_ref(), id).await
    }
}
