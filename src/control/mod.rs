pub mod scheduler;
pub mod service;

pub use scheduler::{Scheduler, SchedulerError, SchedulerSettings, TickOutcome, TriggerSecret};
pub use service::{ControlService, SwitchOutcome};
