use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UueStage {
    Understand,
    Use,
    Explore,
}

impl UueStage {
    pub const ALL: [UueStage; 3] = [UueStage::Understand, UueStage::Use, UueStage::Explore];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Understand => "UNDERSTAND",
            Self::Use => "USE",
            Self::Explore => "EXPLORE",
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Understand => Some(Self::Use),
            Self::Use => Some(Self::Explore),
            Self::Explore => None,
        }
    }
}

impl std::fmt::Display for UueStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingIntensity {
    Dense,
    #[default]
    Normal,
    Sparse,
}

impl TrackingIntensity {
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Dense => 0.7,
            Self::Normal => 1.0,
            Self::Sparse => 1.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dense => "DENSE",
            Self::Normal => "NORMAL",
            Self::Sparse => "SPARSE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasteryThresholdTier {
    Survey,
    #[default]
    Proficient,
    Expert,
}

impl MasteryThresholdTier {
    pub fn value(&self) -> f64 {
        match self {
            Self::Survey => 0.6,
            Self::Proficient => 0.8,
            Self::Expert => 0.95,
        }
    }
}

/// Daily task priority tiers, ordered from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Critical,
    Core,
    Plus,
}

impl TaskPriority {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Critical => "Urgent items - overdue by 3+ days or failed multiple times",
            Self::Core => "Important items - due today or tomorrow",
            Self::Plus => "Nice to have - upcoming previews and long-term reinforcement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryCriterion {
    pub id: String,
    pub section_id: String,
    pub uue_stage: UueStage,
    pub weight: f64,
    pub mastery_threshold: f64,
    pub description: String,
    #[serde(default)]
    pub question_types: Vec<String>,
}

impl MasteryCriterion {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("criterion id must not be empty".to_string());
        }
        if self.section_id.trim().is_empty() {
            return Err(format!("criterion {} has no section", self.id));
        }
        validate_weight(self.weight)?;
        validate_threshold(self.mastery_threshold)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionUpdate {
    pub weight: Option<f64>,
    pub mastery_threshold: Option<f64>,
    pub description: Option<String>,
    pub question_types: Option<Vec<String>>,
}

impl CriterionUpdate {
    pub fn apply(self, criterion: &mut MasteryCriterion) -> Result<(), String> {
        if let Some(weight) = self.weight {
            validate_weight(weight)?;
            criterion.weight = weight;
        }
        if let Some(threshold) = self.mastery_threshold {
            validate_threshold(threshold)?;
            criterion.mastery_threshold = threshold;
        }
        if let Some(description) = self.description {
            criterion.description = description;
        }
        if let Some(question_types) = self.question_types {
            criterion.question_types = question_types;
        }
        Ok(())
    }
}

fn validate_weight(weight: f64) -> Result<(), String> {
    if weight.is_finite() && weight > 0.0 {
        Ok(())
    } else {
        Err(format!("weight must be positive, got {weight}"))
    }
}

fn validate_threshold(threshold: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(format!("mastery threshold must be within 0..=1, got {threshold}"))
    }
}

/// Per (user, criterion) mastery state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCriterionMastery {
    pub user_id: String,
    pub criterion_id: String,
    pub section_id: String,
    pub uue_stage: UueStage,
    pub mastery_score: f64,
    pub consecutive_intervals: u32,
    /// Recent performance scores, oldest first.
    pub attempt_history: VecDeque<f64>,
    pub interval_step: usize,
    pub tracking_intensity: TrackingIntensity,
    pub is_mastered: bool,
    pub next_review_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_mastered_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Bumped by the store on every successful write.
    pub version: u64,
}

impl UserCriterionMastery {
    pub fn new(user_id: &str, criterion: &MasteryCriterion, intensity: TrackingIntensity) -> Self {
        Self {
            user_id: user_id.to_string(),
            criterion_id: criterion.id.clone(),
            section_id: criterion.section_id.clone(),
            uue_stage: criterion.uue_stage,
            mastery_score: 0.0,
            consecutive_intervals: 0,
            attempt_history: VecDeque::new(),
            interval_step: 0,
            tracking_intensity: intensity,
            is_mastered: false,
            next_review_at: None,
            last_attempt_at: None,
            last_mastered_at: None,
            consecutive_failures: 0,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintSection {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSchedulingPreferences {
    pub daily_budget_minutes: u32,
    pub preferred_stages: Vec<UueStage>,
    pub default_intensity: TrackingIntensity,
    pub mastery_threshold_tier: MasteryThresholdTier,
}

impl Default for UserSchedulingPreferences {
    fn default() -> Self {
        Self {
            daily_budget_minutes: 60,
            preferred_stages: UueStage::ALL.to_vec(),
            default_intensity: TrackingIntensity::Normal,
            mastery_threshold_tier: MasteryThresholdTier::Proficient,
        }
    }
}
