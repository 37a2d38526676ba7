//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod scheduler;

pub use engine::{EngineError, ExecutionEngine, ExecutionEvent};
pub use executor::JobExecutor;
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
