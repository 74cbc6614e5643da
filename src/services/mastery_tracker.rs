use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::db::{CriterionRepository, UserMasteryRepository, UserPreferencesProvider};
use crate::error::EngineError;
use crate::services::interval_scheduler;
use crate::types::{TrackingIntensity, UserCriterionMastery, UueStage};

/// Qualifying intervals needed before a criterion counts as mastered.
pub const MASTERY_REQUIRED_INTERVALS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningStyle {
    Conservative,
    Balanced,
    Aggressive,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryOptions {
    /// Falls back to `EngineConfig::default_min_gap_days`.
    pub min_gap_days: Option<i64>,
    pub custom_threshold: Option<f64>,
    pub allow_retry_same_day: bool,
    pub adaptive_intensity: bool,
}

impl MasteryOptions {
    pub fn for_learning_style(style: LearningStyle) -> Self {
        match style {
            LearningStyle::Conservative => Self {
                min_gap_days: Some(2),
                ..Self::default()
            },
            LearningStyle::Balanced => Self {
                min_gap_days: Some(1),
                ..Self::default()
            },
            LearningStyle::Aggressive => Self {
                min_gap_days: Some(0),
                adaptive_intensity: true,
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Recorded,
    RateLimited { retry_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub criterion_id: String,
    pub section_id: String,
    pub uue_stage: UueStage,
    pub status: ReviewStatus,
    pub old_mastery_score: f64,
    pub new_mastery_score: f64,
    pub is_mastered: bool,
    pub newly_mastered: bool,
    pub consecutive_intervals: u32,
    pub consecutive_failures: u32,
    pub interval_step: usize,
    pub tracking_intensity: TrackingIntensity,
    pub next_review_at: Option<DateTime<Utc>>,
    pub confidence: Option<f64>,
    pub stage_progressed: bool,
    pub message: String,
}

impl ReviewResult {
    fn rate_limited(record: &UserCriterionMastery, retry_at: DateTime<Utc>) -> Self {
        Self {
            criterion_id: record.criterion_id.clone(),
            section_id: record.section_id.clone(),
            uue_stage: record.uue_stage,
            status: ReviewStatus::RateLimited { retry_at },
            old_mastery_score: record.mastery_score,
            new_mastery_score: record.mastery_score,
            is_mastered: record.is_mastered,
            newly_mastered: false,
            consecutive_intervals: record.consecutive_intervals,
            consecutive_failures: record.consecutive_failures,
            interval_step: record.interval_step,
            tracking_intensity: record.tracking_intensity,
            next_review_at: record.next_review_at,
            confidence: None,
            stage_progressed: false,
            message: format!("Too soon to review again; retry after {}", retry_at.to_rfc3339()),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.status, ReviewStatus::RateLimited { .. })
    }

    /// The rate limit as an error, for callers that reject early retries outright.
    pub fn rate_limit_error(&self) -> Option<EngineError> {
        match self.status {
            ReviewStatus::RateLimited { retry_at } => Some(EngineError::RateLimited { retry_at }),
            ReviewStatus::Recorded => None,
        }
    }

    pub fn mark_stage_progressed(&mut self) {
        self.stage_progressed = true;
        self.message = match self.uue_stage.next() {
            Some(next) => format!("{}; {} stage unlocked", self.message, next),
            None => format!("{}; all stages complete", self.message),
        };
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionItem {
    pub criterion_id: String,
    pub description: String,
    pub section_id: String,
    pub uue_stage: UueStage,
    pub mastery_score: f64,
    pub days_since_last_attempt: Option<i64>,
    pub recommended_action: String,
}

pub struct CriterionMasteryTracker {
    criteria: Arc<dyn CriterionRepository>,
    masteries: Arc<dyn UserMasteryRepository>,
    preferences: Arc<dyn UserPreferencesProvider>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl CriterionMasteryTracker {
    pub fn new(
        criteria: Arc<dyn CriterionRepository>,
        masteries: Arc<dyn UserMasteryRepository>,
        preferences: Arc<dyn UserPreferencesProvider>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            criteria,
            masteries,
            preferences,
            clock,
            config,
        }
    }

    pub async fn process_review(
        &self,
        user_id: &str,
        criterion_id: &str,
        is_correct: bool,
        performance_score: f64,
        options: &MasteryOptions,
    ) -> Result<ReviewResult, EngineError> {
        let now = self.clock.now();
        self.process_review_at(
            user_id,
            criterion_id,
            is_correct,
            performance_score,
            options,
            now,
        )
        .await
    }

    pub async fn process_review_at(
        &self,
        user_id: &str,
        criterion_id: &str,
        is_correct: bool,
        performance_score: f64,
        options: &MasteryOptions,
        at: DateTime<Utc>,
    ) -> Result<ReviewResult, EngineError> {
        let criterion = self
            .criteria
            .get_by_id(criterion_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("criterion {criterion_id}")))?;
        let preferences = self.preferences.get(user_id).await?;
        let record = self
            .masteries
            .get_or_create_default(user_id, &criterion, preferences.default_intensity)
            .await?;

        let min_gap_days = options
            .min_gap_days
            .unwrap_or(self.config.default_min_gap_days);
        if !options.allow_retry_same_day && min_gap_days > 0 {
            if let Some(last) = record.last_attempt_at {
                if calendar_days_between(last, at) < min_gap_days {
                    let retry_at = retry_after(last, min_gap_days);
                    tracing::debug!(
                        user_id = %user_id,
                        criterion_id = %criterion_id,
                        retry_at = %retry_at,
                        "review rate limited"
                    );
                    return Ok(ReviewResult::rate_limited(&record, retry_at));
                }
            }
        }

        let threshold = options
            .custom_threshold
            .unwrap_or(criterion.mastery_threshold)
            .clamp(0.0, 1.0);
        let performance = clamp_score(performance_score);

        let mut updated = record.clone();
        push_attempt(
            &mut updated.attempt_history,
            performance,
            self.config.history_cap,
        );
        updated.mastery_score =
            weighted_mastery_score(&updated.attempt_history, self.config.decay_factor);
        updated.consecutive_intervals = next_consecutive_intervals(
            record.consecutive_intervals,
            performance >= threshold,
            record.last_attempt_at,
            at,
        );
        updated.is_mastered = updated.consecutive_intervals >= MASTERY_REQUIRED_INTERVALS;
        let newly_mastered = updated.is_mastered && !record.is_mastered;
        if newly_mastered {
            updated.last_mastered_at = Some(at);
        }

        let decision = interval_scheduler::next_interval(
            record.interval_step,
            is_correct,
            record.tracking_intensity,
            record.consecutive_failures,
            at,
        );
        updated.consecutive_failures = if is_correct {
            0
        } else {
            record.consecutive_failures.saturating_add(1)
        };
        updated.interval_step = decision.next_step;
        updated.next_review_at = Some(decision.next_review_at);
        updated.last_attempt_at = Some(at);
        if options.adaptive_intensity {
            updated.tracking_intensity = decision.recommended_intensity;
        }

        let saved = self.masteries.update(&updated).await?;

        tracing::debug!(
            user_id = %user_id,
            criterion_id = %criterion_id,
            old_score = record.mastery_score,
            new_score = saved.mastery_score,
            step = saved.interval_step,
            intensity = saved.tracking_intensity.as_str(),
            "review recorded"
        );
        if newly_mastered {
            tracing::info!(user_id = %user_id, criterion_id = %criterion_id, "criterion mastered");
        }

        Ok(ReviewResult {
            criterion_id: saved.criterion_id.clone(),
            section_id: saved.section_id.clone(),
            uue_stage: saved.uue_stage,
            status: ReviewStatus::Recorded,
            old_mastery_score: record.mastery_score,
            new_mastery_score: saved.mastery_score,
            is_mastered: saved.is_mastered,
            newly_mastered,
            consecutive_intervals: saved.consecutive_intervals,
            consecutive_failures: saved.consecutive_failures,
            interval_step: saved.interval_step,
            tracking_intensity: saved.tracking_intensity,
            next_review_at: saved.next_review_at,
            confidence: Some(decision.confidence),
            stage_progressed: false,
            message: review_message(record.mastery_score, saved.mastery_score, newly_mastered),
        })
    }

    /// Sets a criterion's cadence and reschedules its pending review under it.
    pub async fn set_tracking_intensity(
        &self,
        user_id: &str,
        criterion_id: &str,
        intensity: TrackingIntensity,
    ) -> Result<UserCriterionMastery, EngineError> {
        let criterion = self
            .criteria
            .get_by_id(criterion_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("criterion {criterion_id}")))?;
        let preferences = self.preferences.get(user_id).await?;
        let record = self
            .masteries
            .get_or_create_default(user_id, &criterion, preferences.default_intensity)
            .await?;
        if record.tracking_intensity == intensity {
            return Ok(record);
        }

        let mut updated = record.clone();
        updated.tracking_intensity = intensity;
        if let Some(last) = record.last_attempt_at {
            let days = interval_scheduler::scaled_interval_days(record.interval_step, intensity);
            if let Some(next) = Duration::try_days(days).and_then(|d| last.checked_add_signed(d)) {
                updated.next_review_at = Some(next);
            }
        }
        let saved = self.masteries.update(&updated).await?;

        tracing::info!(
            user_id = %user_id,
            criterion_id = %criterion_id,
            from = record.tracking_intensity.as_str(),
            to = intensity.as_str(),
            "tracking intensity changed"
        );
        Ok(saved)
    }

    /// Back to the user's default intensity.
    pub async fn reset_tracking_intensity(
        &self,
        user_id: &str,
        criterion_id: &str,
    ) -> Result<UserCriterionMastery, EngineError> {
        let preferences = self.preferences.get(user_id).await?;
        self.set_tracking_intensity(user_id, criterion_id, preferences.default_intensity)
            .await
    }

    pub async fn tracking_intensity(
        &self,
        user_id: &str,
        criterion_id: &str,
    ) -> Result<TrackingIntensity, EngineError> {
        if self.criteria.get_by_id(criterion_id).await?.is_none() {
            return Err(EngineError::NotFound(format!("criterion {criterion_id}")));
        }
        match self.masteries.get(user_id, criterion_id).await? {
            Some(record) => Ok(record.tracking_intensity),
            None => Ok(self.preferences.get(user_id).await?.default_intensity),
        }
    }

    pub async fn criteria_needing_attention(
        &self,
        user_id: &str,
        score_below: f64,
    ) -> Result<Vec<AttentionItem>, EngineError> {
        let now = self.clock.now();
        let records = self.masteries.list_for_user(user_id).await?;

        let mut items = Vec::new();
        for record in records
            .into_iter()
            .filter(|r| !r.is_mastered && r.mastery_score < score_below)
        {
            let Some(criterion) = self.criteria.get_by_id(&record.criterion_id).await? else {
                tracing::warn!(
                    user_id = %user_id,
                    criterion_id = %record.criterion_id,
                    "mastery record references unknown criterion"
                );
                continue;
            };
            let days_since_last_attempt = record
                .last_attempt_at
                .map(|last| (now - last).num_days().max(0));
            items.push(AttentionItem {
                criterion_id: record.criterion_id,
                description: criterion.description,
                section_id: record.section_id,
                uue_stage: record.uue_stage,
                mastery_score: record.mastery_score,
                days_since_last_attempt,
                recommended_action: attention_action(days_since_last_attempt).to_string(),
            });
        }

        items.sort_by(|a, b| a.mastery_score.total_cmp(&b.mastery_score));
        Ok(items)
    }
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub fn push_attempt(history: &mut VecDeque<f64>, score: f64, cap: usize) {
    history.push_back(score);
    while history.len() > cap {
        history.pop_front();
    }
}

/// Exponentially weighted mean, newest entry weighted 1.
pub fn weighted_mastery_score(history: &VecDeque<f64>, decay: f64) -> f64 {
    if history.is_empty() {
        return 0.0;
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut weight = 1.0;
    for score in history.iter().rev() {
        weighted_sum += score * weight;
        weight_total += weight;
        weight *= decay;
    }

    (weighted_sum / weight_total).clamp(0.0, 1.0)
}

pub fn next_consecutive_intervals(
    current: u32,
    passed: bool,
    last_attempt_at: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> u32 {
    if !passed {
        return 0;
    }
    match last_attempt_at {
        Some(last) if calendar_days_between(last, at) == 0 => current,
        _ => current.saturating_add(1),
    }
}

pub fn calendar_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to.date_naive() - from.date_naive()).num_days()
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN))
}

/// Midnight UTC `gap_days` after the last attempt's day, saturating at the latest instant.
pub fn retry_after(last_attempt: DateTime<Utc>, gap_days: i64) -> DateTime<Utc> {
    Duration::try_days(gap_days)
        .and_then(|gap| start_of_day(last_attempt).checked_add_signed(gap))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn review_message(old: f64, new: f64, newly_mastered: bool) -> String {
    if newly_mastered {
        "Criterion mastered".to_string()
    } else if new > old {
        format!(
            "Progress up from {:.0}% to {:.0}%",
            old * 100.0,
            new * 100.0
        )
    } else if new < old {
        format!("Mastery down to {:.0}%", new * 100.0)
    } else {
        "Mastery unchanged".to_string()
    }
}

fn attention_action(days_since_last_attempt: Option<i64>) -> &'static str {
    match days_since_last_attempt {
        None => "Urgent review needed",
        Some(days) if days > 7 => "Urgent review needed",
        Some(days) if days > 3 => "Review this week",
        Some(_) => "Review soon",
    }
}
