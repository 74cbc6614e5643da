mod common;

use chrono::Duration;

use common::{base_time, criterion, days, TestHarness, SECTION, USER};
use mastery_engine::config::EngineConfig;
use mastery_engine::services::mastery_tracker::MasteryOptions;
use mastery_engine::types::{TaskPriority, UserSchedulingPreferences, UueStage};

fn set_budget(h: &TestHarness, minutes: u32) {
    h.store.set_preferences(
        USER,
        UserSchedulingPreferences {
            daily_budget_minutes: minutes,
            ..UserSchedulingPreferences::default()
        },
    );
}

#[tokio::test]
async fn tasks_are_bucketed_by_urgency() {
    let h = TestHarness::new();
    h.add_section(SECTION, "Closures");
    let overdue = h.add_criterion("overdue", SECTION, UueStage::Understand, 1.0).await;
    let failing = h.add_criterion("failing", SECTION, UueStage::Use, 1.0).await;
    let due = h.add_criterion("due", SECTION, UueStage::Use, 1.0).await;
    let tomorrow = h.add_criterion("tomorrow", SECTION, UueStage::Use, 1.0).await;
    let preview = h.add_criterion("preview", SECTION, UueStage::Explore, 1.0).await;
    let far = h.add_criterion("far", SECTION, UueStage::Explore, 1.0).await;

    h.put_record(&overdue, |r| r.next_review_at = Some(base_time() - days(4)));
    h.put_record(&failing, |r| {
        r.next_review_at = Some(base_time() - Duration::hours(1));
        r.consecutive_failures = 2;
    });
    h.put_record(&due, |r| r.next_review_at = Some(base_time()));
    h.put_record(&tomorrow, |r| r.next_review_at = Some(base_time() + Duration::hours(20)));
    h.put_record(&preview, |r| r.next_review_at = Some(base_time() + Duration::hours(36)));
    h.put_record(&far, |r| r.next_review_at = Some(base_time() + days(5)));

    let response = h.engine.get_daily_tasks(USER).await.unwrap();

    let critical: Vec<&str> = response
        .critical
        .tasks
        .iter()
        .map(|t| t.criterion_id.as_str())
        .collect();
    assert_eq!(critical, vec!["failing", "overdue"]);
    let core: Vec<&str> = response
        .core
        .tasks
        .iter()
        .map(|t| t.criterion_id.as_str())
        .collect();
    assert_eq!(core, vec!["due", "tomorrow"]);
    assert_eq!(response.plus.count, 1);
    assert_eq!(response.plus.tasks[0].criterion_id, "preview");
    assert!(response.overflow.is_empty());

    assert_eq!(response.total_tasks, 5);
    assert_eq!(response.estimated_minutes, 29);
    assert_eq!(response.critical.tasks[1].days_overdue, 4);
    assert_eq!(
        response.critical.tasks[0].section_name.as_deref(),
        Some("Closures")
    );
    assert_eq!(response.critical.tasks[0].priority, TaskPriority::Critical);

    let capacity = &response.capacity_analysis;
    assert_eq!(capacity.budget_minutes, 60);
    assert_eq!(capacity.remaining_minutes, 31);
    assert_eq!(capacity.over_budget_minutes, 0);
    assert!(response
        .recommendations
        .iter()
        .any(|r| r.starts_with("You have 31 minutes remaining")));
}

#[tokio::test]
async fn critical_tasks_exceed_budget_rather_than_drop() {
    let h = TestHarness::new();
    h.add_section(SECTION, "Closures");
    set_budget(&h, 20);

    for i in 0..4 {
        let c = h
            .add_criterion(&format!("crit-{i}"), SECTION, UueStage::Understand, 1.0)
            .await;
        h.put_record(&c, |r| r.next_review_at = Some(base_time() - days(5)));
    }
    for i in 0..2 {
        let c = h
            .add_criterion(&format!("core-{i}"), SECTION, UueStage::Use, 1.0)
            .await;
        h.put_record(&c, |r| r.next_review_at = Some(base_time()));
    }

    let response = h.engine.get_daily_tasks(USER).await.unwrap();
    assert_eq!(response.critical.count, 4);
    assert_eq!(response.core.count, 0);
    assert_eq!(response.overflow.len(), 2);
    assert!(response
        .overflow
        .iter()
        .all(|t| t.priority == TaskPriority::Core));

    let capacity = &response.capacity_analysis;
    assert_eq!(capacity.used_minutes, 32);
    assert_eq!(capacity.remaining_minutes, 0);
    assert_eq!(capacity.over_budget_minutes, 12);
    assert_eq!(capacity.critical_overflow, 0);
    assert_eq!(capacity.core_overflow, 2);
    assert!(response
        .recommendations
        .iter()
        .any(|r| r.starts_with("2 tasks did not fit")));
    assert!(response
        .recommendations
        .iter()
        .any(|r| r.contains("over capacity by 12 minutes")));
}

#[tokio::test]
async fn previews_follow_preferred_stages() {
    let h = TestHarness::new();
    h.add_section(SECTION, "Closures");
    h.store.set_preferences(
        USER,
        UserSchedulingPreferences {
            preferred_stages: vec![UueStage::Understand],
            ..UserSchedulingPreferences::default()
        },
    );
    let wanted = h.add_criterion("wanted", SECTION, UueStage::Understand, 1.0).await;
    let skipped = h.add_criterion("skipped", SECTION, UueStage::Explore, 1.0).await;
    let due_use = h.add_criterion("due-use", SECTION, UueStage::Use, 1.0).await;
    h.put_record(&wanted, |r| r.next_review_at = Some(base_time() + Duration::hours(40)));
    h.put_record(&skipped, |r| r.next_review_at = Some(base_time() + Duration::hours(40)));
    h.put_record(&due_use, |r| r.next_review_at = Some(base_time()));

    let response = h.engine.get_daily_tasks(USER).await.unwrap();
    assert_eq!(response.plus.count, 1);
    assert_eq!(response.plus.tasks[0].criterion_id, "wanted");
    assert_eq!(response.core.count, 1);
    assert_eq!(response.core.tasks[0].criterion_id, "due-use");
    assert!(response
        .recommendations
        .iter()
        .all(|r| !r.starts_with("All tasks are high priority")));
}

#[tokio::test]
async fn missing_section_and_criterion_degrade_gracefully() {
    let h = TestHarness::new();
    let known = h.add_criterion("known", "no-such-section", UueStage::Use, 1.0).await;
    h.put_record(&known, |r| r.next_review_at = Some(base_time()));
    let ghost = criterion("ghost", SECTION, UueStage::Use, 1.0);
    h.put_record(&ghost, |r| r.next_review_at = Some(base_time()));

    let response = h.engine.get_daily_tasks(USER).await.unwrap();
    assert_eq!(response.total_tasks, 1);
    assert_eq!(response.core.tasks[0].criterion_id, "known");
    assert_eq!(response.core.tasks[0].section_name, None);
    assert!(response
        .recommendations
        .iter()
        .any(|r| r.starts_with("All tasks are high priority")));
}

#[tokio::test]
async fn reviewed_criterion_returns_when_due() {
    let h = TestHarness::new();
    h.add_section(SECTION, "Closures");
    h.add_criterion("c1", SECTION, UueStage::Understand, 1.0).await;

    h.engine
        .process_review(USER, "c1", true, 0.9, &MasteryOptions::default())
        .await
        .unwrap();
    assert_eq!(h.engine.get_daily_tasks(USER).await.unwrap().total_tasks, 0);

    h.advance_days(3);
    let response = h.engine.get_daily_tasks(USER).await.unwrap();
    assert_eq!(response.core.count, 1);
    assert_eq!(response.core.tasks[0].mastery_score, 0.9);
}

#[tokio::test]
async fn capacity_gap_compares_due_work_with_budget() {
    let h = TestHarness::new();
    set_budget(&h, 20);
    for i in 0..2 {
        let c = h
            .add_criterion(&format!("crit-{i}"), SECTION, UueStage::Understand, 1.0)
            .await;
        h.put_record(&c, |r| r.next_review_at = Some(base_time() - days(3)));
    }
    for i in 0..3 {
        let c = h
            .add_criterion(&format!("core-{i}"), SECTION, UueStage::Use, 1.0)
            .await;
        h.put_record(&c, |r| r.next_review_at = Some(base_time()));
    }

    let gap = h.engine.get_capacity_gap(USER).await.unwrap();
    assert_eq!(gap.current_capacity, 20);
    assert_eq!(gap.required_capacity, 31);
    assert_eq!(gap.gap, 11);
    assert_eq!(gap.recommendations.len(), 3);
    assert!(gap.priority_adjustments.is_empty());

    let idle = TestHarness::new();
    let gap = idle.engine.get_capacity_gap(USER).await.unwrap();
    assert_eq!(gap.gap, -60);
    assert_eq!(gap.recommendations[0], "You have 60 minutes of extra capacity");
}

#[tokio::test]
async fn oversized_task_minutes_saturate_instead_of_overflowing() {
    let mut config = EngineConfig::default();
    config.task_minutes.critical = u32::MAX;
    let h = TestHarness::with_config(config);
    h.add_section(SECTION, "Closures");
    for i in 0..2 {
        let c = h
            .add_criterion(&format!("crit-{i}"), SECTION, UueStage::Understand, 1.0)
            .await;
        h.put_record(&c, |r| r.next_review_at = Some(base_time() - days(3)));
    }

    let gap = h.engine.get_capacity_gap(USER).await.unwrap();
    assert_eq!(gap.required_capacity, u32::MAX);
    assert_eq!(gap.gap, i64::from(u32::MAX) - 60);

    let response = h.engine.get_daily_tasks(USER).await.unwrap();
    assert_eq!(response.critical.count, 2);
    assert_eq!(response.estimated_minutes, u32::MAX);
}
