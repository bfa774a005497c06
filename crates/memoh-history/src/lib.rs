pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{HistoryError, Result};
pub use store::HistoryStore;
pub use types::HistoryRecord;
