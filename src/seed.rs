use chrono::{DateTime, Duration, Utc};

use crate::db::{CriterionRepository, MemoryStore, StoreError};
use crate::services::batch_review::BatchReviewOutcome;
use crate::types::{
    BlueprintSection, MasteryCriterion, MasteryThresholdTier, TrackingIntensity,
    UserSchedulingPreferences, UueStage,
};

struct SeedCriterion {
    id: &'static str,
    section_id: &'static str,
    stage: UueStage,
    weight: f64,
    description: &'static str,
    question_types: &'static [&'static str],
}

const DEMO_SECTIONS: &[(&str, &str)] = &[
    ("ownership", "Ownership and Borrowing"),
    ("traits", "Traits and Generics"),
];

const DEMO_CRITERIA: &[SeedCriterion] = &[
    SeedCriterion {
        id: "ownership-move",
        section_id: "ownership",
        stage: UueStage::Understand,
        weight: 2.0,
        description: "Explain move semantics",
        question_types: &["multiple_choice", "short_answer"],
    },
    SeedCriterion {
        id: "ownership-borrow",
        section_id: "ownership",
        stage: UueStage::Understand,
        weight: 1.0,
        description: "Distinguish shared and mutable borrows",
        question_types: &["multiple_choice"],
    },
    SeedCriterion {
        id: "ownership-lifetimes",
        section_id: "ownership",
        stage: UueStage::Use,
        weight: 1.5,
        description: "Annotate lifetimes on a function signature",
        question_types: &["code_completion"],
    },
    SeedCriterion {
        id: "ownership-arena",
        section_id: "ownership",
        stage: UueStage::Explore,
        weight: 1.0,
        description: "Design an arena allocator API",
        question_types: &["open_ended"],
    },
    SeedCriterion {
        id: "traits-define",
        section_id: "traits",
        stage: UueStage::Understand,
        weight: 1.0,
        description: "Define a trait with a default method",
        question_types: &["short_answer"],
    },
    SeedCriterion {
        id: "traits-bounds",
        section_id: "traits",
        stage: UueStage::Use,
        weight: 1.0,
        description: "Write generic functions with trait bounds",
        question_types: &["code_completion"],
    },
];

pub const DEMO_USER_ID: &str = "demo-learner";

/// Loads demo sections, criteria and preferences. Existing criteria are left alone.
pub async fn seed_demo_learner(store: &MemoryStore, user_id: &str) -> Result<(), StoreError> {
    for (id, name) in DEMO_SECTIONS {
        store.insert_section(BlueprintSection {
            id: (*id).to_string(),
            name: (*name).to_string(),
        });
    }

    for seed in DEMO_CRITERIA {
        if store.get_by_id(seed.id).await?.is_some() {
            tracing::debug!(criterion_id = seed.id, "demo criterion already exists");
            continue;
        }
        store
            .create(MasteryCriterion {
                id: seed.id.to_string(),
                section_id: seed.section_id.to_string(),
                uue_stage: seed.stage,
                weight: seed.weight,
                mastery_threshold: MasteryThresholdTier::Proficient.value(),
                description: seed.description.to_string(),
                question_types: seed.question_types.iter().map(|t| t.to_string()).collect(),
            })
            .await?;
    }

    store.set_preferences(
        user_id,
        UserSchedulingPreferences {
            daily_budget_minutes: 30,
            default_intensity: TrackingIntensity::Normal,
            ..UserSchedulingPreferences::default()
        },
    );

    tracing::info!(
        user_id = %user_id,
        sections = DEMO_SECTIONS.len(),
        criteria = DEMO_CRITERIA.len(),
        "seeded demo learner"
    );
    Ok(())
}

/// One review per criterion per day starting at `start`, missing every fourth answer.
pub fn demo_review_days(start: DateTime<Utc>, days: u32) -> Vec<BatchReviewOutcome> {
    let mut outcomes = Vec::new();
    for day in 0..days {
        let reviewed_at = start + Duration::days(i64::from(day));
        for (idx, seed) in DEMO_CRITERIA.iter().enumerate() {
            let is_correct = (day as usize + idx) % 4 != 0;
            outcomes.push(BatchReviewOutcome {
                criterion_id: seed.id.to_string(),
                is_correct,
                confidence: if is_correct { 0.9 } else { 0.4 },
                time_spent_seconds: 45,
                reviewed_at: reviewed_at + Duration::minutes(idx as i64),
                performance_score: None,
            });
        }
    }
    outcomes
}
