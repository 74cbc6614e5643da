pub mod batch_review;
pub mod daily_tasks;
pub mod interval_scheduler;
pub mod mastery_tracker;
pub mod stage_mastery;
