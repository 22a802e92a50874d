pub mod history;
pub mod service;

pub use history::{HistoryPoint, HistoryRange, HistoryService};
pub use service::{CollectError, CollectOutcome, SensorService};
