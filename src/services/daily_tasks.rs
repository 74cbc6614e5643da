use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::db::{
    CriterionRepository, SectionRepository, UserMasteryRepository, UserPreferencesProvider,
};
use crate::error::EngineError;
use crate::types::{TaskPriority, UserCriterionMastery, UserSchedulingPreferences, UueStage};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTask {
    pub task_id: String,
    pub criterion_id: String,
    pub section_id: String,
    pub section_name: Option<String>,
    pub uue_stage: UueStage,
    pub description: String,
    pub priority: TaskPriority,
    pub estimated_minutes: u32,
    pub mastery_score: f64,
    pub days_overdue: i64,
    pub consecutive_failures: u32,
    pub next_review_at: Option<DateTime<Utc>>,
    pub question_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBucket {
    pub priority: TaskPriority,
    pub description: String,
    pub count: usize,
    pub tasks: Vec<DailyTask>,
}

impl TaskBucket {
    fn new(priority: TaskPriority, tasks: Vec<DailyTask>) -> Self {
        Self {
            priority,
            description: priority.description().to_string(),
            count: tasks.len(),
            tasks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityAnalysis {
    pub budget_minutes: u32,
    pub used_minutes: u32,
    pub remaining_minutes: u32,
    pub over_budget_minutes: u32,
    pub utilization_percent: f64,
    pub critical_overflow: usize,
    pub core_overflow: usize,
    pub plus_overflow: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTasksResponse {
    pub user_id: String,
    pub generated_at: DateTime<Utc>,
    pub critical: TaskBucket,
    pub core: TaskBucket,
    pub plus: TaskBucket,
    pub overflow: Vec<DailyTask>,
    pub capacity_analysis: CapacityAnalysis,
    pub recommendations: Vec<String>,
    pub total_tasks: usize,
    pub estimated_minutes: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Allocation {
    pub critical: Vec<DailyTask>,
    pub core: Vec<DailyTask>,
    pub plus: Vec<DailyTask>,
    pub overflow: Vec<DailyTask>,
    pub used_minutes: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityGap {
    pub current_capacity: u32,
    pub required_capacity: u32,
    /// Positive when the due work exceeds the budget.
    pub gap: i64,
    pub recommendations: Vec<String>,
    pub priority_adjustments: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionDifficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSet {
    pub task_id: String,
    pub criterion_id: String,
    pub question_count: u32,
    pub question_types: Vec<String>,
    pub difficulty: QuestionDifficulty,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPlan {
    pub sets: Vec<QuestionSet>,
    pub total_questions: u32,
}

pub struct DailyTaskAllocator {
    criteria: Arc<dyn CriterionRepository>,
    masteries: Arc<dyn UserMasteryRepository>,
    sections: Arc<dyn SectionRepository>,
    preferences: Arc<dyn UserPreferencesProvider>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl DailyTaskAllocator {
    pub fn new(
        criteria: Arc<dyn CriterionRepository>,
        masteries: Arc<dyn UserMasteryRepository>,
        sections: Arc<dyn SectionRepository>,
        preferences: Arc<dyn UserPreferencesProvider>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            criteria,
            masteries,
            sections,
            preferences,
            clock,
            config,
        }
    }

    pub async fn build_daily_tasks(
        &self,
        user_id: &str,
    ) -> Result<DailyTasksResponse, EngineError> {
        let now = self.clock.now();
        let preferences = self.preferences.get(user_id).await?;

        let mut records = self.due_records(user_id, now).await?;
        let previews = self
            .preview_records(user_id, now, &preferences, &records)
            .await?;
        records.extend(previews);

        let tasks = self.build_tasks(user_id, records, now).await?;

        let mut critical = Vec::new();
        let mut core = Vec::new();
        let mut plus = Vec::new();
        for task in tasks {
            match task.priority {
                TaskPriority::Critical => critical.push(task),
                TaskPriority::Core => core.push(task),
                TaskPriority::Plus => plus.push(task),
            }
        }
        sort_critical(&mut critical);
        sort_by_due(&mut core);
        sort_by_due(&mut plus);

        let budget = preferences.daily_budget_minutes;
        let allocation = allocate(critical, core, plus, budget);
        let capacity_analysis = analyze_capacity(&allocation, budget);
        let recommendations = capacity_recommendations(&capacity_analysis, &allocation);

        tracing::info!(
            user_id = %user_id,
            critical = allocation.critical.len(),
            core = allocation.core.len(),
            plus = allocation.plus.len(),
            overflow = allocation.overflow.len(),
            used_minutes = allocation.used_minutes,
            budget_minutes = budget,
            "daily tasks built"
        );

        let total_tasks = allocation.critical.len() + allocation.core.len() + allocation.plus.len();
        Ok(DailyTasksResponse {
            user_id: user_id.to_string(),
            generated_at: now,
            estimated_minutes: allocation.used_minutes,
            critical: TaskBucket::new(TaskPriority::Critical, allocation.critical),
            core: TaskBucket::new(TaskPriority::Core, allocation.core),
            plus: TaskBucket::new(TaskPriority::Plus, allocation.plus),
            overflow: allocation.overflow,
            capacity_analysis,
            recommendations,
            total_tasks,
        })
    }

    pub async fn capacity_gap(&self, user_id: &str) -> Result<CapacityGap, EngineError> {
        let now = self.clock.now();
        let preferences = self.preferences.get(user_id).await?;
        let records = self.due_records(user_id, now).await?;
        let minutes = self.config.task_minutes;

        let mut critical_count = 0u32;
        let mut core_count = 0u32;
        for record in &records {
            match classify_priority(record, now, self.config.overdue_grace_days) {
                TaskPriority::Critical => critical_count += 1,
                TaskPriority::Core => core_count += 1,
                TaskPriority::Plus => {}
            }
        }

        let required_capacity = critical_count
            .saturating_mul(minutes.critical)
            .saturating_add(core_count.saturating_mul(minutes.core));
        let current_capacity = preferences.daily_budget_minutes;
        let gap = i64::from(required_capacity) - i64::from(current_capacity);

        let mut recommendations = Vec::new();
        let mut priority_adjustments = Vec::new();
        if gap > 0 {
            recommendations.push(format!(
                "Increase daily study time by {gap} minutes to cover all due tasks"
            ));
            recommendations
                .push("Consider reducing tracking intensity for non-critical criteria".to_string());
            recommendations
                .push("Focus on critical tasks first, defer core tasks to tomorrow".to_string());
            if critical_count > 5 {
                priority_adjustments.push(
                    "Too many critical tasks - consider reducing tracking intensity".to_string(),
                );
            }
        } else if gap < -20 {
            recommendations.push(format!("You have {} minutes of extra capacity", -gap));
            recommendations.push(
                "Consider adding more core tasks or previewing next stage content".to_string(),
            );
            recommendations.push("Increase tracking intensity for faster progression".to_string());
        }

        Ok(CapacityGap {
            current_capacity,
            required_capacity,
            gap,
            recommendations,
            priority_adjustments,
        })
    }

    /// Due now or overdue past the grace window, one record per criterion.
    async fn due_records(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserCriterionMastery>, EngineError> {
        let due = self.masteries.list_due(user_id, now).await?;
        let overdue = self
            .masteries
            .list_overdue(user_id, now, self.config.overdue_grace_days)
            .await?;

        let mut seen = HashSet::new();
        Ok(due
            .into_iter()
            .chain(overdue)
            .filter(|r| seen.insert(r.criterion_id.clone()))
            .collect())
    }

    async fn preview_records(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        preferences: &UserSchedulingPreferences,
        already: &[UserCriterionMastery],
    ) -> Result<Vec<UserCriterionMastery>, EngineError> {
        let Some(horizon) = preview_horizon(now, self.config.preview_horizon_days) else {
            return Ok(Vec::new());
        };
        let taken: HashSet<&str> = already.iter().map(|r| r.criterion_id.as_str()).collect();

        Ok(self
            .masteries
            .list_due(user_id, horizon)
            .await?
            .into_iter()
            .filter(|r| r.next_review_at.is_some_and(|at| at > now))
            .filter(|r| preferences.preferred_stages.contains(&r.uue_stage))
            .filter(|r| !taken.contains(r.criterion_id.as_str()))
            .collect())
    }

    async fn build_tasks(
        &self,
        user_id: &str,
        records: Vec<UserCriterionMastery>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DailyTask>, EngineError> {
        let mut section_ids: Vec<String> = records.iter().map(|r| r.section_id.clone()).collect();
        section_ids.sort();
        section_ids.dedup();
        let section_names: HashMap<String, String> = self
            .sections
            .list_sections(&section_ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();

        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            let Some(criterion) = self.criteria.get_by_id(&record.criterion_id).await? else {
                tracing::warn!(
                    user_id = %user_id,
                    criterion_id = %record.criterion_id,
                    "skipping task for unknown criterion"
                );
                continue;
            };

            let section_name = section_names.get(&record.section_id).cloned();
            if section_name.is_none() {
                tracing::warn!(
                    user_id = %user_id,
                    section_id = %record.section_id,
                    "section missing for daily task"
                );
            }

            let priority = classify_priority(&record, now, self.config.overdue_grace_days);
            tasks.push(DailyTask {
                task_id: Uuid::new_v4().to_string(),
                criterion_id: record.criterion_id,
                section_id: record.section_id,
                section_name,
                uue_stage: record.uue_stage,
                description: criterion.description,
                priority,
                estimated_minutes: self.config.task_minutes.for_priority(priority),
                mastery_score: record.mastery_score,
                days_overdue: days_overdue(record.next_review_at, now),
                consecutive_failures: record.consecutive_failures,
                next_review_at: record.next_review_at,
                question_types: criterion.question_types,
            });
        }
        Ok(tasks)
    }
}

/// End of the preview window, or `None` when previews are off or the window is unrepresentable.
pub fn preview_horizon(now: DateTime<Utc>, horizon_days: i64) -> Option<DateTime<Utc>> {
    if horizon_days <= 0 {
        return None;
    }
    Duration::try_days(horizon_days).and_then(|span| now.checked_add_signed(span))
}

/// Whole days past `next_review_at`, never negative.
pub fn days_overdue(next_review_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    next_review_at
        .map(|at| (now - at).num_days().max(0))
        .unwrap_or(0)
}

pub fn classify_priority(
    record: &UserCriterionMastery,
    now: DateTime<Utc>,
    grace_days: i64,
) -> TaskPriority {
    if record.consecutive_failures >= 2 || days_overdue(record.next_review_at, now) >= grace_days {
        return TaskPriority::Critical;
    }
    match record.next_review_at {
        Some(at) if at <= now + Duration::days(1) => TaskPriority::Core,
        _ => TaskPriority::Plus,
    }
}

fn sort_critical(tasks: &mut [DailyTask]) {
    tasks.sort_by(|a, b| {
        b.consecutive_failures
            .cmp(&a.consecutive_failures)
            .then_with(|| b.days_overdue.cmp(&a.days_overdue))
            .then_with(|| a.criterion_id.cmp(&b.criterion_id))
    });
}

fn sort_by_due(tasks: &mut [DailyTask]) {
    tasks.sort_by(|a, b| {
        a.next_review_at
            .cmp(&b.next_review_at)
            .then_with(|| a.mastery_score.total_cmp(&b.mastery_score))
            .then_with(|| a.criterion_id.cmp(&b.criterion_id))
    });
}

/// Critical tasks are always scheduled; Core then Plus fill what budget remains.
pub fn allocate(
    critical: Vec<DailyTask>,
    core: Vec<DailyTask>,
    plus: Vec<DailyTask>,
    budget_minutes: u32,
) -> Allocation {
    let mut allocation = Allocation {
        used_minutes: critical
            .iter()
            .fold(0u32, |used, t| used.saturating_add(t.estimated_minutes)),
        critical,
        ..Allocation::default()
    };

    for task in core {
        let used = allocation.used_minutes.saturating_add(task.estimated_minutes);
        if used <= budget_minutes {
            allocation.used_minutes = used;
            allocation.core.push(task);
        } else {
            allocation.overflow.push(task);
        }
    }
    for task in plus {
        let used = allocation.used_minutes.saturating_add(task.estimated_minutes);
        if used <= budget_minutes {
            allocation.used_minutes = used;
            allocation.plus.push(task);
        } else {
            allocation.overflow.push(task);
        }
    }

    allocation
}

pub fn analyze_capacity(allocation: &Allocation, budget_minutes: u32) -> CapacityAnalysis {
    let used = allocation.used_minutes;
    let utilization_percent = used as f64 / budget_minutes.max(1) as f64 * 100.0;
    let overflow_count = |priority: TaskPriority| {
        allocation
            .overflow
            .iter()
            .filter(|t| t.priority == priority)
            .count()
    };

    CapacityAnalysis {
        budget_minutes,
        used_minutes: used,
        remaining_minutes: budget_minutes.saturating_sub(used),
        over_budget_minutes: used.saturating_sub(budget_minutes),
        utilization_percent,
        critical_overflow: 0,
        core_overflow: overflow_count(TaskPriority::Core),
        plus_overflow: overflow_count(TaskPriority::Plus),
    }
}

pub fn capacity_recommendations(
    analysis: &CapacityAnalysis,
    allocation: &Allocation,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    let overflow = analysis.core_overflow + analysis.plus_overflow;
    if overflow > 0 {
        recommendations.push(format!(
            "{overflow} tasks did not fit today's budget ({} core, {} plus). Consider increasing study time or reducing tracking intensity.",
            analysis.core_overflow, analysis.plus_overflow
        ));
    }
    if analysis.utilization_percent < 80.0 {
        recommendations.push(format!(
            "You have {} minutes remaining. Consider adding more core tasks or previewing next stage content.",
            analysis.remaining_minutes
        ));
    }
    if analysis.utilization_percent > 120.0 {
        recommendations.push(format!(
            "You're over capacity by {} minutes. Consider increasing study time or prioritizing critical tasks only.",
            analysis.over_budget_minutes
        ));
    }
    if allocation.plus.is_empty() && !allocation.core.is_empty() {
        recommendations.push(
            "All tasks are high priority. Consider adding some preview content for variety.".to_string(),
        );
    }

    recommendations
}

pub fn question_plan(tasks: &[DailyTask]) -> QuestionPlan {
    let sets: Vec<QuestionSet> = tasks
        .iter()
        .map(|task| QuestionSet {
            task_id: task.task_id.clone(),
            criterion_id: task.criterion_id.clone(),
            question_count: question_count(task.priority, task.mastery_score),
            question_types: task.question_types.clone(),
            difficulty: difficulty_for_stage(task.uue_stage),
        })
        .collect();
    let total_questions = sets.iter().map(|s| s.question_count).sum();

    QuestionPlan {
        sets,
        total_questions,
    }
}

fn question_count(priority: TaskPriority, mastery_score: f64) -> u32 {
    let base: u32 = match priority {
        TaskPriority::Critical => 5,
        TaskPriority::Core => 3,
        TaskPriority::Plus => 2,
    };
    if mastery_score < 0.3 {
        base + 2
    } else if mastery_score > 0.8 {
        base.saturating_sub(1).max(1)
    } else {
        base
    }
}

fn difficulty_for_stage(stage: UueStage) -> QuestionDifficulty {
    match stage {
        UueStage::Understand => QuestionDifficulty::Easy,
        UueStage::Use => QuestionDifficulty::Medium,
        UueStage::Explore => QuestionDifficulty::Hard,
    }
}
