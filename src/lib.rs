//! eventflow: streaming user-activity aggregation
//!
//! Pipeline: broker record → deserialize → validate → publish to the event
//! bus → aggregator increments an in-memory counter → periodic flush
//! merges the counters into PostgreSQL inside one transaction.
//!
//! Delivery is at-least-once with respect to the broker; the store
//! converges because the flush upsert is a commutative counter addition.

pub mod aggregator;
pub mod config;
pub mod consumer;
pub mod error_handler;
pub mod events;
pub mod store;

pub use aggregator::{AggregationCache, EventAggregator};
pub use config::{AppConfig, ConfigError, EventProcessingConfig, KafkaConfig, PostgresConfig};
pub use consumer::{ConsumerError, KafkaEventConsumer, RecordError};
pub use events::{
    EventBus, EventObserver, ObserverResult, StatsKey, Subscription, UserEvent, UserEventRecord,
    UserEventStats, ValidationError,
};
pub use store::{InMemoryStatsStore, PgStatsStore, StatsStore, StoreError};
