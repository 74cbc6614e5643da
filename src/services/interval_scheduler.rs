use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::types::TrackingIntensity;

pub const BASE_INTERVALS_DAYS: [u32; 6] = [1, 3, 7, 21, 60, 180];
pub const MAX_STEP: usize = BASE_INTERVALS_DAYS.len() - 1;

const MIN_INTERVAL_DAYS: i64 = 1;
const MAX_SUCCESS_CONFIDENCE: f64 = 0.95;
const RESET_CONFIDENCE: f64 = 0.2;
const MIN_FAILURE_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalDecision {
    pub next_step: usize,
    pub interval_days: i64,
    pub next_review_at: DateTime<Utc>,
    pub confidence: f64,
    pub recommended_intensity: TrackingIntensity,
}

/// `consecutive_failures` is the streak before this review.
pub fn next_interval(
    current_step: usize,
    is_correct: bool,
    intensity: TrackingIntensity,
    consecutive_failures: u32,
    now: DateTime<Utc>,
) -> IntervalDecision {
    let step = current_step.min(MAX_STEP);

    let (next_step, confidence, failures_now) = if is_correct {
        let next_step = (step + 1).min(MAX_STEP);
        let confidence = (0.5 + next_step as f64 * 0.1).min(MAX_SUCCESS_CONFIDENCE);
        (next_step, confidence, 0)
    } else {
        let failures_now = consecutive_failures.saturating_add(1);
        if failures_now >= 2 {
            (0, RESET_CONFIDENCE, failures_now)
        } else {
            let confidence = (0.5 - failures_now as f64 * 0.1).max(MIN_FAILURE_CONFIDENCE);
            (step.saturating_sub(1), confidence, failures_now)
        }
    };

    let interval_days = scaled_interval_days(next_step, intensity);

    IntervalDecision {
        next_step,
        interval_days,
        next_review_at: now + Duration::days(interval_days),
        confidence,
        recommended_intensity: recommend_intensity(next_step, confidence, failures_now),
    }
}

pub fn scaled_interval_days(step: usize, intensity: TrackingIntensity) -> i64 {
    let base = BASE_INTERVALS_DAYS[step.min(MAX_STEP)] as f64;
    let scaled = (base * intensity.multiplier()).round() as i64;
    scaled.max(MIN_INTERVAL_DAYS)
}

pub fn recommend_intensity(
    next_step: usize,
    confidence: f64,
    failures_now: u32,
) -> TrackingIntensity {
    if failures_now >= 2 || confidence < 0.3 {
        TrackingIntensity::Dense
    } else if next_step <= 2 || confidence < 0.6 {
        TrackingIntensity::Normal
    } else {
        TrackingIntensity::Sparse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_success_advances_step() {
        let decision = next_interval(2, true, TrackingIntensity::Normal, 0, now());
        assert_eq!(decision.next_step, 3);
        assert_eq!(decision.interval_days, 21);
        assert!((decision.confidence - 0.8).abs() < 1e-9);
        assert_eq!(decision.next_review_at, now() + Duration::days(21));
        assert_eq!(decision.recommended_intensity, TrackingIntensity::Sparse);
    }

    #[test]
    fn test_success_caps_at_last_step() {
        let decision = next_interval(5, true, TrackingIntensity::Normal, 0, now());
        assert_eq!(decision.next_step, MAX_STEP);
        assert_eq!(decision.interval_days, 180);
        assert!((decision.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_first_failure_steps_back() {
        let decision = next_interval(3, false, TrackingIntensity::Normal, 0, now());
        assert_eq!(decision.next_step, 2);
        assert_eq!(decision.interval_days, 7);
        assert!((decision.confidence - 0.4).abs() < 1e-9);
        assert_eq!(decision.recommended_intensity, TrackingIntensity::Normal);
    }

    #[test]
    fn test_second_failure_resets() {
        let decision = next_interval(4, false, TrackingIntensity::Normal, 1, now());
        assert_eq!(decision.next_step, 0);
        assert_eq!(decision.interval_days, 1);
        assert!((decision.confidence - 0.2).abs() < 1e-9);
        assert_eq!(decision.recommended_intensity, TrackingIntensity::Dense);
    }

    #[test]
    fn test_intensity_multiplier_and_floor() {
        assert_eq!(scaled_interval_days(0, TrackingIntensity::Dense), 1);
        assert_eq!(scaled_interval_days(1, TrackingIntensity::Dense), 2);
        assert_eq!(scaled_interval_days(2, TrackingIntensity::Sparse), 11);
        assert_eq!(scaled_interval_days(5, TrackingIntensity::Sparse), 270);
    }

    #[test]
    fn test_out_of_range_step_is_clamped() {
        let decision = next_interval(42, false, TrackingIntensity::Normal, 0, now());
        assert_eq!(decision.next_step, 4);
        assert_eq!(decision.interval_days, 60);
    }
}
