use std::sync::Arc;

use chrono::{Duration, Utc};

use mastery_engine::clock::FixedClock;
use mastery_engine::config::Config;
use mastery_engine::db::MemoryStore;
use mastery_engine::logging;
use mastery_engine::seed::{self, DEMO_USER_ID};
use mastery_engine::services::daily_tasks::question_plan;
use mastery_engine::{MasteryEngine, Repositories};

const REPLAY_DAYS: u32 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.logging);

    let store = Arc::new(MemoryStore::new());
    seed::seed_demo_learner(&store, DEMO_USER_ID).await?;

    let today = Utc::now();
    let replay_start = today - Duration::days(i64::from(REPLAY_DAYS) + 2);
    let clock = Arc::new(FixedClock::new(replay_start));
    let engine = MasteryEngine::new(
        Repositories::in_memory(Arc::clone(&store)),
        clock.clone(),
        config.engine.clone(),
    );

    let outcomes = seed::demo_review_days(replay_start, REPLAY_DAYS);
    let batch = engine.process_batch(DEMO_USER_ID, outcomes).await?;
    tracing::info!(
        succeeded = batch.success_count,
        failed = batch.failure_count,
        progressions = batch.stage_progressions,
        "demo reviews replayed"
    );

    clock.set(today);
    let tasks = engine.get_daily_tasks(DEMO_USER_ID).await?;
    println!("{}", serde_json::to_string_pretty(&tasks)?);

    let scheduled: Vec<_> = tasks
        .critical
        .tasks
        .iter()
        .chain(&tasks.core.tasks)
        .chain(&tasks.plus.tasks)
        .cloned()
        .collect();
    let plan = question_plan(&scheduled);
    tracing::info!(
        question_sets = plan.sets.len(),
        total_questions = plan.total_questions,
        "question plan ready"
    );

    Ok(())
}
