use std::sync::Arc;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::db::{
    CriterionRepository, MemoryStore, SectionRepository, UserMasteryRepository,
    UserPreferencesProvider,
};
use crate::error::EngineError;
use crate::services::batch_review::{
    BatchOptions, BatchResult, BatchReviewOutcome, BatchReviewProcessor,
};
use crate::services::daily_tasks::{CapacityGap, DailyTaskAllocator, DailyTasksResponse};
use crate::services::mastery_tracker::{
    AttentionItem, CriterionMasteryTracker, MasteryOptions, ReviewResult,
};
use crate::services::stage_mastery::{
    LearningPath, ProgressionReport, SectionMasteryResult, StageAggregationEngine,
    StageCompletionStats, StageMasteryResult, UserMasterySummary,
};
use crate::types::{TrackingIntensity, UserCriterionMastery, UueStage};

/// External collaborators the engine reads and writes through.
#[derive(Clone)]
pub struct Repositories {
    pub criteria: Arc<dyn CriterionRepository>,
    pub masteries: Arc<dyn UserMasteryRepository>,
    pub sections: Arc<dyn SectionRepository>,
    pub preferences: Arc<dyn UserPreferencesProvider>,
}

impl Repositories {
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            criteria: store.clone(),
            masteries: store.clone(),
            sections: store.clone(),
            preferences: store,
        }
    }
}

#[derive(Clone)]
pub struct MasteryEngine {
    tracker: Arc<CriterionMasteryTracker>,
    stages: Arc<StageAggregationEngine>,
    tasks: Arc<DailyTaskAllocator>,
    batch: Arc<BatchReviewProcessor>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl MasteryEngine {
    pub fn new(repos: Repositories, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let tracker = Arc::new(CriterionMasteryTracker::new(
            Arc::clone(&repos.criteria),
            Arc::clone(&repos.masteries),
            Arc::clone(&repos.preferences),
            Arc::clone(&clock),
            config.clone(),
        ));
        let stages = Arc::new(StageAggregationEngine::new(
            Arc::clone(&repos.criteria),
            Arc::clone(&repos.masteries),
            Arc::clone(&repos.sections),
            Arc::clone(&repos.preferences),
        ));
        let tasks = Arc::new(DailyTaskAllocator::new(
            Arc::clone(&repos.criteria),
            Arc::clone(&repos.masteries),
            Arc::clone(&repos.sections),
            Arc::clone(&repos.preferences),
            Arc::clone(&clock),
            config.clone(),
        ));
        let batch = Arc::new(BatchReviewProcessor::new(
            Arc::clone(&tracker),
            Arc::clone(&stages),
            config.clone(),
        ));

        Self {
            tracker,
            stages,
            tasks,
            batch,
            clock,
            config,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Records one review. Once the mastery write has committed the review is reported as
    /// recorded; a failing progression check only leaves `stage_progressed` false.
    pub async fn process_review(
        &self,
        user_id: &str,
        criterion_id: &str,
        is_correct: bool,
        performance_score: f64,
        options: &MasteryOptions,
    ) -> Result<ReviewResult, EngineError> {
        let mut result = self
            .tracker
            .process_review(user_id, criterion_id, is_correct, performance_score, options)
            .await?;
        match self.stages.progression_after_review(user_id, &result).await {
            Ok(true) => result.mark_stage_progressed(),
            Ok(false) => {}
            Err(err) => tracing::warn!(
                error = %err,
                user_id = %user_id,
                criterion_id = %criterion_id,
                "stage progression check failed"
            ),
        }
        Ok(result)
    }

    pub async fn process_batch(
        &self,
        user_id: &str,
        outcomes: Vec<BatchReviewOutcome>,
    ) -> Result<BatchResult, EngineError> {
        self.process_batch_with(user_id, outcomes, &BatchOptions::default())
            .await
    }

    pub async fn process_batch_with(
        &self,
        user_id: &str,
        outcomes: Vec<BatchReviewOutcome>,
        options: &BatchOptions,
    ) -> Result<BatchResult, EngineError> {
        let result = self
            .batch
            .process_batch_with(user_id, outcomes, options)
            .await?;
        if let Some(partial) = result.partial_failure() {
            tracing::warn!(
                user_id = %user_id,
                code = partial.code(),
                error = %partial,
                "batch completed with failures"
            );
        }
        Ok(result)
    }

    pub async fn get_daily_tasks(&self, user_id: &str) -> Result<DailyTasksResponse, EngineError> {
        self.tasks.build_daily_tasks(user_id).await
    }

    pub async fn get_capacity_gap(&self, user_id: &str) -> Result<CapacityGap, EngineError> {
        self.tasks.capacity_gap(user_id).await
    }

    pub async fn get_stage_progress(
        &self,
        user_id: &str,
        section_id: &str,
        stage: UueStage,
    ) -> Result<StageMasteryResult, EngineError> {
        self.stages.stage_mastery(section_id, stage, user_id).await
    }

    pub async fn can_progress_stage(
        &self,
        user_id: &str,
        section_id: &str,
        from_stage: UueStage,
    ) -> Result<bool, EngineError> {
        self.stages.can_progress(user_id, section_id, from_stage).await
    }

    pub async fn get_section_mastery(
        &self,
        user_id: &str,
        section_id: &str,
    ) -> Result<SectionMasteryResult, EngineError> {
        self.stages.section_mastery(section_id, user_id).await
    }

    pub async fn get_progression_report(
        &self,
        user_id: &str,
        section_id: &str,
        current_stage: UueStage,
    ) -> Result<ProgressionReport, EngineError> {
        self.stages
            .progression_report(user_id, section_id, current_stage)
            .await
    }

    pub async fn get_learning_path(
        &self,
        user_id: &str,
        section_id: &str,
    ) -> Result<LearningPath, EngineError> {
        self.stages.learning_path(user_id, section_id).await
    }

    pub async fn get_current_stage(
        &self,
        user_id: &str,
        section_id: &str,
    ) -> Result<UueStage, EngineError> {
        self.stages.current_stage(user_id, section_id).await
    }

    pub async fn get_stage_completion_stats(
        &self,
        user_id: &str,
        section_id: &str,
    ) -> Result<StageCompletionStats, EngineError> {
        self.stages.stage_completion_stats(user_id, section_id).await
    }

    pub async fn get_mastery_summary(
        &self,
        user_id: &str,
    ) -> Result<UserMasterySummary, EngineError> {
        self.stages.mastery_summary(user_id).await
    }

    pub async fn get_tracking_intensity(
        &self,
        user_id: &str,
        criterion_id: &str,
    ) -> Result<TrackingIntensity, EngineError> {
        self.tracker.tracking_intensity(user_id, criterion_id).await
    }

    pub async fn set_tracking_intensity(
        &self,
        user_id: &str,
        criterion_id: &str,
        intensity: TrackingIntensity,
    ) -> Result<UserCriterionMastery, EngineError> {
        self.tracker
            .set_tracking_intensity(user_id, criterion_id, intensity)
            .await
    }

    pub async fn reset_tracking_intensity(
        &self,
        user_id: &str,
        criterion_id: &str,
    ) -> Result<UserCriterionMastery, EngineError> {
        self.tracker
            .reset_tracking_intensity(user_id, criterion_id)
            .await
    }

    pub async fn get_criteria_needing_attention(
        &self,
        user_id: &str,
        score_below: f64,
    ) -> Result<Vec<AttentionItem>, EngineError> {
        self.tracker
            .criteria_needing_attention(user_id, score_below)
            .await
    }
}
