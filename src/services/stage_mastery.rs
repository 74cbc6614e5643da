use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::db::{
    CriterionRepository, SectionRepository, UserMasteryRepository, UserPreferencesProvider,
};
use crate::error::EngineError;
use crate::services::mastery_tracker::ReviewResult;
use crate::types::{MasteryCriterion, MasteryThresholdTier, UserCriterionMastery, UueStage};

const MINUTES_PER_UNMASTERED_CRITERION: u32 = 5;
/// Assumed daily progress through a stage when estimating completion.
const PROGRESS_PERCENT_PER_DAY: f64 = 10.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionBreakdown {
    pub criterion_id: String,
    pub description: String,
    pub weight: f64,
    pub mastery_score: f64,
    pub is_mastered: bool,
    pub consecutive_intervals: u32,
    pub attempted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMasteryResult {
    pub section_id: String,
    pub stage: UueStage,
    pub mastery_score: f64,
    pub is_mastered: bool,
    pub threshold: f64,
    pub total_criteria: usize,
    pub mastered_criteria: usize,
    pub total_weight: f64,
    pub breakdown: Vec<CriterionBreakdown>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub stage: UueStage,
    pub mastery_score: f64,
    pub is_mastered: bool,
    pub criteria_count: usize,
    pub mastered_criteria: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionMasteryResult {
    pub section_id: String,
    pub mastery_score: f64,
    pub is_mastered: bool,
    pub total_stages: usize,
    pub mastered_stages: usize,
    pub progress_percent: f64,
    pub stages: Vec<StageSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionReport {
    pub section_id: String,
    pub current_stage: UueStage,
    pub can_progress: bool,
    pub next_stage: Option<UueStage>,
    pub next_milestone: String,
    pub missing_criteria: Vec<String>,
    pub progress_percent: f64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Locked,
    InProgress,
    Mastered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriterionStatus {
    NotStarted,
    InProgress,
    Mastered,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathCriterion {
    pub criterion_id: String,
    pub description: String,
    pub status: CriterionStatus,
    pub mastery_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStage {
    pub stage: UueStage,
    pub status: StageStatus,
    pub progress_percent: f64,
    /// `None` once the stage is complete.
    pub estimated_days_to_complete: Option<u32>,
    pub criteria: Vec<PathCriterion>,
}

impl PathStage {
    fn remaining_minutes(&self) -> u32 {
        let unmastered = self
            .criteria
            .iter()
            .filter(|c| c.status != CriterionStatus::Mastered)
            .count();
        u32::try_from(unmastered)
            .unwrap_or(u32::MAX)
            .saturating_mul(MINUTES_PER_UNMASTERED_CRITERION)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPath {
    pub section_id: String,
    pub section_name: String,
    pub stages: Vec<PathStage>,
    /// Mean of the per-stage progress values.
    pub overall_progress_percent: f64,
    pub estimated_minutes_remaining: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCompletionStats {
    pub section_id: String,
    pub total_stages: usize,
    pub completed_stages: usize,
    pub current_stage: UueStage,
    pub next_milestone: String,
    pub estimated_minutes_to_completion: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCount {
    pub stage: UueStage,
    pub count: usize,
    pub mastered: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMasterySummary {
    pub user_id: String,
    pub total_sections: usize,
    pub mastered_sections: usize,
    pub total_criteria: usize,
    pub mastered_criteria: usize,
    pub average_mastery_score: f64,
    pub stage_breakdown: Vec<StageCount>,
}

/// Criteria of one stage paired with the user's record, if any.
type StageInputs = Vec<(MasteryCriterion, Option<UserCriterionMastery>)>;

pub struct StageAggregationEngine {
    criteria: Arc<dyn CriterionRepository>,
    masteries: Arc<dyn UserMasteryRepository>,
    sections: Arc<dyn SectionRepository>,
    preferences: Arc<dyn UserPreferencesProvider>,
}

impl StageAggregationEngine {
    pub fn new(
        criteria: Arc<dyn CriterionRepository>,
        masteries: Arc<dyn UserMasteryRepository>,
        sections: Arc<dyn SectionRepository>,
        preferences: Arc<dyn UserPreferencesProvider>,
    ) -> Self {
        Self {
            criteria,
            masteries,
            sections,
            preferences,
        }
    }

    pub async fn stage_mastery(
        &self,
        section_id: &str,
        stage: UueStage,
        user_id: &str,
    ) -> Result<StageMasteryResult, EngineError> {
        let tier = self.threshold_tier(user_id, section_id).await?;
        let inputs = self.stage_inputs(user_id, section_id, stage).await?;
        Ok(stage_result(section_id, stage, tier.value(), &inputs))
    }

    pub async fn section_mastery(
        &self,
        section_id: &str,
        user_id: &str,
    ) -> Result<SectionMasteryResult, EngineError> {
        let mut stages = Vec::with_capacity(UueStage::ALL.len());
        for stage in UueStage::ALL {
            stages.push(self.stage_mastery(section_id, stage, user_id).await?);
        }
        Ok(section_from_stages(section_id, &stages))
    }

    /// True when every criterion of `from_stage` is individually mastered.
    pub async fn can_progress(
        &self,
        user_id: &str,
        section_id: &str,
        from_stage: UueStage,
    ) -> Result<bool, EngineError> {
        let inputs = self.stage_inputs(user_id, section_id, from_stage).await?;
        Ok(inputs.iter().all(|(_, record)| is_record_mastered(record)))
    }

    /// Runs the progression gate after a review that newly mastered its criterion.
    pub async fn progression_after_review(
        &self,
        user_id: &str,
        result: &ReviewResult,
    ) -> Result<bool, EngineError> {
        if !result.newly_mastered {
            return Ok(false);
        }
        self.stage_completed(user_id, &result.section_id, result.uue_stage)
            .await
    }

    /// Progression gate for a stage that just gained a mastered criterion.
    pub async fn stage_completed(
        &self,
        user_id: &str,
        section_id: &str,
        stage: UueStage,
    ) -> Result<bool, EngineError> {
        let progressed = self.can_progress(user_id, section_id, stage).await?;
        if progressed {
            tracing::info!(
                user_id = %user_id,
                section_id = %section_id,
                stage = %stage,
                "stage completed"
            );
        }
        Ok(progressed)
    }

    pub async fn progression_report(
        &self,
        user_id: &str,
        section_id: &str,
        current_stage: UueStage,
    ) -> Result<ProgressionReport, EngineError> {
        let inputs = self.stage_inputs(user_id, section_id, current_stage).await?;

        let missing_criteria: Vec<String> = inputs
            .iter()
            .filter(|(_, record)| !is_record_mastered(record))
            .map(|(criterion, _)| criterion.description.clone())
            .collect();
        let can_progress = missing_criteria.is_empty();
        let progress_percent =
            mastered_percent(inputs.len() - missing_criteria.len(), inputs.len());
        let next_stage = current_stage.next();
        let next_milestone = next_milestone(current_stage);

        Ok(ProgressionReport {
            section_id: section_id.to_string(),
            current_stage,
            can_progress,
            next_stage: if can_progress { next_stage } else { None },
            next_milestone,
            recommendations: progression_recommendations(
                current_stage,
                progress_percent,
                &missing_criteria,
            ),
            missing_criteria,
            progress_percent,
        })
    }

    pub async fn learning_path(
        &self,
        user_id: &str,
        section_id: &str,
    ) -> Result<LearningPath, EngineError> {
        let section_name = self.section_name(section_id).await?;

        let mut stages = Vec::with_capacity(UueStage::ALL.len());
        for stage in UueStage::ALL {
            let inputs = self.stage_inputs(user_id, section_id, stage).await?;
            stages.push(path_stage(stage, &inputs));
        }

        let overall_progress_percent =
            stages.iter().map(|s| s.progress_percent).sum::<f64>() / stages.len() as f64;
        let estimated_minutes_remaining = stages
            .iter()
            .filter(|s| s.estimated_days_to_complete.is_some())
            .fold(0u32, |total, s| total.saturating_add(s.remaining_minutes()));

        Ok(LearningPath {
            section_id: section_id.to_string(),
            section_name,
            stages,
            overall_progress_percent,
            estimated_minutes_remaining,
        })
    }

    /// Highest stage holding any of the user's records, else UNDERSTAND.
    pub async fn current_stage(
        &self,
        user_id: &str,
        section_id: &str,
    ) -> Result<UueStage, EngineError> {
        for stage in UueStage::ALL.into_iter().rev() {
            let inputs = self.stage_inputs(user_id, section_id, stage).await?;
            if inputs.iter().any(|(_, record)| record.is_some()) {
                return Ok(stage);
            }
        }
        Ok(UueStage::Understand)
    }

    pub async fn stage_completion_stats(
        &self,
        user_id: &str,
        section_id: &str,
    ) -> Result<StageCompletionStats, EngineError> {
        let current_stage = self.current_stage(user_id, section_id).await?;
        let path = self.learning_path(user_id, section_id).await?;

        let completed_stages = path
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Mastered)
            .count();
        let estimated_minutes_to_completion = path
            .stages
            .iter()
            .filter(|s| s.status != StageStatus::Mastered)
            .fold(0u32, |total, s| total.saturating_add(s.remaining_minutes()));

        Ok(StageCompletionStats {
            section_id: section_id.to_string(),
            total_stages: UueStage::ALL.len(),
            completed_stages,
            current_stage,
            next_milestone: next_milestone(current_stage),
            estimated_minutes_to_completion,
        })
    }

    /// Totals across every section the user holds records in.
    pub async fn mastery_summary(&self, user_id: &str) -> Result<UserMasterySummary, EngineError> {
        let records = self.masteries.list_for_user(user_id).await?;

        let mut section_ids: Vec<String> = records.iter().map(|r| r.section_id.clone()).collect();
        section_ids.sort();
        section_ids.dedup();

        let mut stage_breakdown: Vec<StageCount> = UueStage::ALL
            .iter()
            .map(|&stage| StageCount {
                stage,
                count: 0,
                mastered: 0,
            })
            .collect();
        let mut mastered_sections = 0;
        let mut score_total = 0.0;
        for section_id in &section_ids {
            let section = self.section_mastery(section_id, user_id).await?;
            if section.is_mastered {
                mastered_sections += 1;
            }
            score_total += section.mastery_score;
            for summary in &section.stages {
                if let Some(entry) = stage_breakdown.iter_mut().find(|e| e.stage == summary.stage) {
                    entry.count += summary.criteria_count;
                    entry.mastered += summary.mastered_criteria;
                }
            }
        }

        let average_mastery_score = if section_ids.is_empty() {
            0.0
        } else {
            score_total / section_ids.len() as f64
        };

        Ok(UserMasterySummary {
            user_id: user_id.to_string(),
            total_sections: section_ids.len(),
            mastered_sections,
            total_criteria: records.len(),
            mastered_criteria: records.iter().filter(|r| r.is_mastered).count(),
            average_mastery_score,
            stage_breakdown,
        })
    }

    async fn section_name(&self, section_id: &str) -> Result<String, EngineError> {
        self.sections
            .list_sections(&[section_id.to_string()])
            .await?
            .into_iter()
            .find(|s| s.id == section_id)
            .map(|s| s.name)
            .ok_or_else(|| EngineError::NotFound(format!("section {section_id}")))
    }

    async fn threshold_tier(
        &self,
        user_id: &str,
        section_id: &str,
    ) -> Result<MasteryThresholdTier, EngineError> {
        if let Some(tier) = self
            .preferences
            .section_threshold(user_id, section_id)
            .await?
        {
            return Ok(tier);
        }
        Ok(self.preferences.get(user_id).await?.mastery_threshold_tier)
    }

    async fn stage_inputs(
        &self,
        user_id: &str,
        section_id: &str,
        stage: UueStage,
    ) -> Result<StageInputs, EngineError> {
        let criteria = self
            .criteria
            .list_by_stage_and_section(section_id, stage)
            .await?;
        let ids: Vec<String> = criteria.iter().map(|c| c.id.clone()).collect();
        let mut records: HashMap<String, UserCriterionMastery> = self
            .masteries
            .list_for_criteria(user_id, &ids)
            .await?
            .into_iter()
            .map(|r| (r.criterion_id.clone(), r))
            .collect();

        Ok(criteria
            .into_iter()
            .map(|criterion| {
                let record = records.remove(&criterion.id);
                (criterion, record)
            })
            .collect())
    }
}

/// Returns `(Σ w·s / Σ w, Σ w)`; an empty or weightless set scores 0.
pub fn weighted_stage_score(items: &[(f64, f64)]) -> (f64, f64) {
    let total_weight: f64 = items.iter().map(|(w, _)| w).sum();
    if total_weight <= 0.0 {
        return (0.0, total_weight.max(0.0));
    }
    let weighted: f64 = items.iter().map(|(w, s)| w * s).sum();
    (weighted / total_weight, total_weight)
}

fn stage_result(
    section_id: &str,
    stage: UueStage,
    threshold: f64,
    inputs: &StageInputs,
) -> StageMasteryResult {
    let breakdown: Vec<CriterionBreakdown> = inputs
        .iter()
        .map(|(criterion, record)| CriterionBreakdown {
            criterion_id: criterion.id.clone(),
            description: criterion.description.clone(),
            weight: criterion.weight,
            mastery_score: record.as_ref().map(|r| r.mastery_score).unwrap_or(0.0),
            is_mastered: is_record_mastered(record),
            consecutive_intervals: record.as_ref().map(|r| r.consecutive_intervals).unwrap_or(0),
            attempted: record.as_ref().is_some_and(|r| r.last_attempt_at.is_some()),
        })
        .collect();

    let pairs: Vec<(f64, f64)> = breakdown
        .iter()
        .map(|b| (b.weight, b.mastery_score))
        .collect();
    let (mastery_score, total_weight) = weighted_stage_score(&pairs);

    StageMasteryResult {
        section_id: section_id.to_string(),
        stage,
        mastery_score,
        is_mastered: !breakdown.is_empty() && mastery_score >= threshold,
        threshold,
        total_criteria: breakdown.len(),
        mastered_criteria: breakdown.iter().filter(|b| b.is_mastered).count(),
        total_weight,
        breakdown,
    }
}

pub fn section_from_stages(
    section_id: &str,
    stages: &[StageMasteryResult],
) -> SectionMasteryResult {
    let total_stages = stages.len();
    let mastered_stages = stages.iter().filter(|s| s.is_mastered).count();
    let mastery_score = if total_stages == 0 {
        0.0
    } else {
        stages.iter().map(|s| s.mastery_score).sum::<f64>() / total_stages as f64
    };

    SectionMasteryResult {
        section_id: section_id.to_string(),
        mastery_score,
        is_mastered: total_stages > 0 && mastered_stages == total_stages,
        total_stages,
        mastered_stages,
        progress_percent: mastered_percent(mastered_stages, total_stages),
        stages: stages
            .iter()
            .map(|s| StageSummary {
                stage: s.stage,
                mastery_score: s.mastery_score,
                is_mastered: s.is_mastered,
                criteria_count: s.total_criteria,
                mastered_criteria: s.mastered_criteria,
            })
            .collect(),
    }
}

fn is_record_mastered(record: &Option<UserCriterionMastery>) -> bool {
    record.as_ref().is_some_and(|r| r.is_mastered)
}

fn criterion_status(record: &Option<UserCriterionMastery>) -> CriterionStatus {
    match record {
        None => CriterionStatus::NotStarted,
        Some(r) if r.is_mastered => CriterionStatus::Mastered,
        Some(r) if r.last_attempt_at.is_none() => CriterionStatus::NotStarted,
        Some(_) => CriterionStatus::InProgress,
    }
}

fn path_stage(stage: UueStage, inputs: &StageInputs) -> PathStage {
    let criteria: Vec<PathCriterion> = inputs
        .iter()
        .map(|(criterion, record)| PathCriterion {
            criterion_id: criterion.id.clone(),
            description: criterion.description.clone(),
            status: criterion_status(record),
            mastery_score: record.as_ref().map(|r| r.mastery_score).unwrap_or(0.0),
        })
        .collect();
    let mastered = criteria
        .iter()
        .filter(|c| c.status == CriterionStatus::Mastered)
        .count();
    // An empty stage has nothing done yet on the path view.
    let progress_percent = if criteria.is_empty() {
        0.0
    } else {
        mastered_percent(mastered, criteria.len())
    };

    PathStage {
        stage,
        status: stage_status(progress_percent, mastered),
        progress_percent,
        estimated_days_to_complete: estimated_days_to_complete(progress_percent),
        criteria,
    }
}

fn estimated_days_to_complete(progress_percent: f64) -> Option<u32> {
    (progress_percent < 100.0)
        .then(|| ((100.0 - progress_percent) / PROGRESS_PERCENT_PER_DAY).ceil() as u32)
}

fn next_milestone(stage: UueStage) -> String {
    match stage.next() {
        Some(next) => format!("Complete {next} stage"),
        None => "Section Complete!".to_string(),
    }
}

fn stage_status(progress_percent: f64, mastered: usize) -> StageStatus {
    if mastered == 0 {
        StageStatus::Locked
    } else if progress_percent >= 100.0 {
        StageStatus::Mastered
    } else {
        StageStatus::InProgress
    }
}

/// Empty sets count as complete, matching the vacuous progression gate.
fn mastered_percent(mastered: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        mastered as f64 / total as f64 * 100.0
    }
}

fn progression_recommendations(
    stage: UueStage,
    progress_percent: f64,
    missing_criteria: &[String],
) -> Vec<String> {
    let mut recommendations = Vec::new();

    if progress_percent < 50.0 {
        recommendations.push(format!("Focus on mastering basic concepts in {stage} stage"));
        recommendations
            .push("Consider reducing tracking intensity for better retention".to_string());
    } else if progress_percent < 80.0 {
        recommendations.push(format!("You're close to completing {stage} stage"));
        let focus: Vec<&str> = missing_criteria.iter().take(3).map(String::as_str).collect();
        recommendations.push(format!("Focus on: {}", focus.join(", ")));
    } else if progress_percent < 100.0 {
        recommendations.push(format!(
            "Almost there! Master these final criteria: {}",
            missing_criteria.join(", ")
        ));
        recommendations
            .push("Consider increasing tracking intensity for faster completion".to_string());
    }

    match stage {
        UueStage::Understand if progress_percent < 60.0 => {
            recommendations.push("Focus on comprehension before moving to application".to_string())
        }
        UueStage::Use if progress_percent < 70.0 => {
            recommendations.push("Practice applying concepts in different contexts".to_string())
        }
        UueStage::Explore if progress_percent < 80.0 => {
            recommendations.push("Deep dive into advanced applications and edge cases".to_string())
        }
        _ => {}
    }

    recommendations
}
