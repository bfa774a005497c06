pub mod db;
pub mod engine;
pub mod error;
pub mod types;

pub use engine::{ScheduleExecutor, TokenMinter};
pub use error::{Result, SchedulerError};
pub use types::Schedule;
