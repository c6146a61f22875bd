pub mod bus;
pub mod error;
pub mod goal;
pub mod processor;
pub mod scheduler;
pub mod source;
pub mod types;

pub use bus::EventBus;
pub use error::{EventError, Result};
pub use goal::{GoalAdapter, GoalAdapterConfig};
pub use processor::{ChatHandler, EventProcessor, GoalFeed, ResponseHandler};
pub use scheduler::SchedulerAdapter;
pub use source::EventSource;
pub use types::{Event, EventPayload, EventPriority, EventType};
