use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::services::mastery_tracker::{CriterionMasteryTracker, MasteryOptions, ReviewResult};
use crate::services::stage_mastery::StageAggregationEngine;
use crate::types::UueStage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReviewOutcome {
    pub criterion_id: String,
    pub is_correct: bool,
    pub confidence: f64,
    pub time_spent_seconds: i64,
    pub reviewed_at: DateTime<Utc>,
    #[serde(default)]
    pub performance_score: Option<f64>,
}

impl BatchReviewOutcome {
    /// Explicit score, else confidence for a correct answer and 0 otherwise.
    pub fn performance(&self) -> f64 {
        self.performance_score
            .unwrap_or(if self.is_correct { self.confidence } else { 0.0 })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Wall-clock budget checked between chunks.
    pub time_budget: Option<Duration>,
    pub mastery: MasteryOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemError {
    pub index: usize,
    pub criterion_id: String,
    pub code: String,
    pub message: String,
}

impl BatchItemError {
    fn from_engine(index: usize, criterion_id: &str, err: &EngineError) -> Self {
        Self {
            index,
            criterion_id: criterion_id.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub processed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub mastery_updates: usize,
    pub stage_progressions: usize,
    pub unprocessed_count: usize,
    pub errors: Vec<BatchItemError>,
    pub warnings: Vec<String>,
    pub processing_time_ms: u64,
}

impl BatchResult {
    pub fn partial_failure(&self) -> Option<EngineError> {
        (self.failure_count > 0).then(|| EngineError::PartialBatchFailure {
            failed: self.failure_count,
            total: self.processed_count,
        })
    }
}

pub type IndexedOutcome = (usize, BatchReviewOutcome);

#[derive(Debug, Default)]
pub struct ValidatedBatch {
    pub valid: Vec<IndexedOutcome>,
    pub errors: Vec<BatchItemError>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default)]
struct GroupOutcome {
    successes: usize,
    mastery_updates: usize,
    /// (section, stage) of every review that newly mastered its criterion.
    newly_mastered: Vec<(String, UueStage)>,
    errors: Vec<BatchItemError>,
}

pub struct BatchReviewProcessor {
    tracker: Arc<CriterionMasteryTracker>,
    stages: Arc<StageAggregationEngine>,
    config: EngineConfig,
}

impl BatchReviewProcessor {
    pub fn new(
        tracker: Arc<CriterionMasteryTracker>,
        stages: Arc<StageAggregationEngine>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tracker,
            stages,
            config,
        }
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
        let started = Instant::now();
        let ValidatedBatch {
            mut valid,
            errors,
            warnings,
        } = validate_outcomes(outcomes, self.config.batch_warning_size)?;

        let mut result = BatchResult {
            failure_count: errors.len(),
            processed_count: errors.len(),
            errors,
            warnings,
            ..BatchResult::default()
        };

        valid.sort_by_key(|(_, outcome)| outcome.reviewed_at);

        let mastery_options = MasteryOptions {
            allow_retry_same_day: true,
            ..options.mastery.clone()
        };

        let chunk_size = self.config.batch_chunk_size.max(1);
        let chunks: Vec<&[IndexedOutcome]> = valid.chunks(chunk_size).collect();
        for (chunk_index, chunk) in chunks.iter().enumerate() {
            if let Some(budget) = options.time_budget {
                if started.elapsed() >= budget {
                    let remaining: usize = chunks[chunk_index..].iter().map(|c| c.len()).sum();
                    result.unprocessed_count = remaining;
                    result.warnings.push(format!(
                        "Time budget exceeded; {remaining} outcomes left unprocessed"
                    ));
                    tracing::warn!(
                        user_id = %user_id,
                        remaining,
                        "batch time budget exceeded"
                    );
                    break;
                }
            }

            let groups = group_by_criterion(chunk);
            let outcomes = join_all(
                groups
                    .iter()
                    .map(|(_, items)| self.process_group(user_id, items, &mastery_options)),
            )
            .await;

            let mut completed: Vec<(String, UueStage)> = Vec::new();
            for (group, outcome) in groups.iter().zip(outcomes) {
                result.processed_count += group.1.len();
                result.success_count += outcome.successes;
                result.failure_count += outcome.errors.len();
                result.mastery_updates += outcome.mastery_updates;
                result.errors.extend(outcome.errors);
                for pair in outcome.newly_mastered {
                    if !completed.contains(&pair) {
                        completed.push(pair);
                    }
                }
            }

            // Groups run concurrently, so the gate is checked once per stage after all writes.
            for (section_id, stage) in &completed {
                match self.stages.stage_completed(user_id, section_id, *stage).await {
                    Ok(true) => result.stage_progressions += 1,
                    Ok(false) => {}
                    Err(err) => tracing::warn!(
                        error = %err,
                        user_id = %user_id,
                        section_id = %section_id,
                        stage = %stage,
                        "stage progression check failed"
                    ),
                }
            }
        }

        result.errors.sort_by_key(|e| e.index);
        result.processing_time_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            user_id = %user_id,
            processed = result.processed_count,
            succeeded = result.success_count,
            failed = result.failure_count,
            unprocessed = result.unprocessed_count,
            progressions = result.stage_progressions,
            elapsed_ms = result.processing_time_ms,
            "batch review processed"
        );

        Ok(result)
    }

    /// Applies one criterion's outcomes oldest first.
    async fn process_group(
        &self,
        user_id: &str,
        items: &[&IndexedOutcome],
        options: &MasteryOptions,
    ) -> GroupOutcome {
        let mut outcome = GroupOutcome::default();

        for (index, review) in items.iter().map(|item| (&item.0, &item.1)) {
            match self.apply_with_retry(user_id, review, options).await {
                Ok(result) => {
                    outcome.successes += 1;
                    if (result.new_mastery_score - result.old_mastery_score).abs() > f64::EPSILON
                        || result.newly_mastered
                    {
                        outcome.mastery_updates += 1;
                    }
                    if result.newly_mastered {
                        outcome
                            .newly_mastered
                            .push((result.section_id, result.uue_stage));
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        user_id = %user_id,
                        criterion_id = %review.criterion_id,
                        "batch outcome failed"
                    );
                    outcome
                        .errors
                        .push(BatchItemError::from_engine(*index, &review.criterion_id, &err));
                }
            }
        }

        outcome
    }

    async fn apply_with_retry(
        &self,
        user_id: &str,
        review: &BatchReviewOutcome,
        options: &MasteryOptions,
    ) -> Result<ReviewResult, EngineError> {
        let mut retries = 0;
        loop {
            let attempt = self
                .tracker
                .process_review_at(
                    user_id,
                    &review.criterion_id,
                    review.is_correct,
                    review.performance(),
                    options,
                    review.reviewed_at,
                )
                .await;

            match attempt {
                Err(EngineError::ConcurrencyConflict { .. })
                    if retries < self.config.conflict_retries =>
                {
                    retries += 1;
                    tracing::debug!(
                        user_id = %user_id,
                        criterion_id = %review.criterion_id,
                        retries,
                        "retrying after version conflict"
                    );
                }
                other => return other,
            }
        }
    }
}

/// Splits a batch into well-formed outcomes and per-item errors.
pub fn validate_outcomes(
    outcomes: Vec<BatchReviewOutcome>,
    warning_size: usize,
) -> Result<ValidatedBatch, EngineError> {
    if outcomes.is_empty() {
        return Err(EngineError::validation("No outcomes provided"));
    }

    let mut batch = ValidatedBatch::default();
    if outcomes.len() > warning_size {
        batch.warnings.push(format!(
            "Large batch of {} outcomes may impact performance; consider smaller batches",
            outcomes.len()
        ));
    }

    for (index, outcome) in outcomes.into_iter().enumerate() {
        let mut violations = Vec::new();
        if outcome.criterion_id.trim().is_empty() {
            violations.push("missing criterionId");
        }
        if !(0.0..=1.0).contains(&outcome.confidence) {
            violations.push("confidence must be within 0..=1");
        }
        if outcome.time_spent_seconds < 0 {
            violations.push("timeSpentSeconds must not be negative");
        }
        if outcome
            .performance_score
            .is_some_and(|score| !score.is_finite())
        {
            violations.push("performanceScore must be a finite number");
        }

        if violations.is_empty() {
            batch.valid.push((index, outcome));
        } else {
            batch.errors.push(BatchItemError {
                index,
                criterion_id: outcome.criterion_id,
                code: "VALIDATION_ERROR".to_string(),
                message: format!("Outcome {index}: {}", violations.join(", ")),
            });
        }
    }

    Ok(batch)
}

/// Groups by criterion in order of first appearance, keeping each group's input order.
pub fn group_by_criterion(chunk: &[IndexedOutcome]) -> Vec<(&str, Vec<&IndexedOutcome>)> {
    let mut groups: Vec<(&str, Vec<&IndexedOutcome>)> = Vec::new();
    for item in chunk {
        let criterion_id = item.1.criterion_id.as_str();
        match groups.iter_mut().find(|(id, _)| *id == criterion_id) {
            Some((_, items)) => items.push(item),
            None => groups.push((criterion_id, vec![item])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn outcome(criterion_id: &str, hour: u32) -> BatchReviewOutcome {
        BatchReviewOutcome {
            criterion_id: criterion_id.to_string(),
            is_correct: true,
            confidence: 0.9,
            time_spent_seconds: 30,
            reviewed_at: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
            performance_score: None,
        }
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let err = validate_outcomes(Vec::new(), 1000).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_malformed_items_are_split_out() {
        let mut bad_confidence = outcome("c2", 2);
        bad_confidence.confidence = f64::NAN;
        let mut negative_time = outcome("c3", 3);
        negative_time.time_spent_seconds = -5;

        let batch = validate_outcomes(
            vec![outcome("c1", 1), bad_confidence, negative_time, outcome(" ", 4)],
            1000,
        )
        .unwrap();
        assert_eq!(batch.valid.len(), 1);
        assert_eq!(batch.errors.len(), 3);
        assert_eq!(batch.errors[0].index, 1);
        assert!(batch.errors[2].message.contains("missing criterionId"));
    }

    #[test]
    fn test_large_batch_warns() {
        let outcomes: Vec<_> = (0..3).map(|i| outcome("c1", i)).collect();
        let batch = validate_outcomes(outcomes, 2).unwrap();
        assert_eq!(batch.warnings.len(), 1);
    }

    #[test]
    fn test_derived_performance() {
        let mut o = outcome("c1", 1);
        assert_eq!(o.performance(), 0.9);
        o.is_correct = false;
        assert_eq!(o.performance(), 0.0);
        o.performance_score = Some(0.4);
        assert_eq!(o.performance(), 0.4);
    }

    #[test]
    fn test_grouping_keeps_first_appearance_order() {
        let chunk: Vec<IndexedOutcome> = vec![
            (0, outcome("b", 1)),
            (1, outcome("a", 2)),
            (2, outcome("b", 3)),
        ];
        let groups = group_by_criterion(&chunk);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[0].1[1].0, 2);
        assert_eq!(groups[1].0, "a");
    }
}
