//! Background task execution for downloads and device work, with an ordered
//! event feed for front ends.

mod error;
mod events;
mod runner;
mod scheduler;
mod task;

pub use error::{SchedulerError, TaskError};
pub use events::{Event, EventBus, EventLevel, EventPayload, EventStream};
pub use scheduler::{TaskHandle, TaskScheduler, DEFAULT_WORKERS};
pub use task::{FlashSequence, FlashStep, TaskId, TaskKind, TaskSpec, TaskStatus};
