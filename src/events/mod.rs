pub mod bus;
pub mod stats;
pub mod user_event;

pub use bus::{EventBus, EventObserver, ObserverResult, Subscription};
pub use stats::{StatsKey, UserEventStats};
pub use user_event::{UserEvent, UserEventRecord, ValidationError};
