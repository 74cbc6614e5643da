pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod seed;
pub mod services;
pub mod types;

pub use engine::{MasteryEngine, Repositories};
pub use error::EngineError;
