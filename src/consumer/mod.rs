//! Kafka consumer loop bridging the broker subscription to the event bus
//!
//! The loop polls one record at a time, deserializes and validates it into
//! a domain event, publishes the event to the bus, then stores and commits
//! the record's offset manually. Malformed or invalid records are logged,
//! skipped, and still committed: a permanently bad payload must never
//! wedge its partition.
//!
//! Offsets are committed immediately after publish, before the aggregated
//! counter reaches the durable store. A crash between that commit and the
//! next flush therefore drops the in-memory delta for those records; the
//! broker will not re-deliver them because their offsets are already
//! committed. Deployments that cannot tolerate that window need the flush
//! interval shortened accordingly.

use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::TopicPartitionList;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::KafkaConfig;
use crate::events::{EventBus, UserEvent, UserEventRecord, ValidationError};

const ERROR_PAUSE: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum ConsumerError {
    Broker(KafkaError),
}

impl From<KafkaError> for ConsumerError {
    fn from(err: KafkaError) -> Self {
        ConsumerError::Broker(err)
    }
}

impl std::fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerError::Broker(err) => write!(f, "Broker error: {}", err),
        }
    }
}

impl std::error::Error for ConsumerError {}

/// Why one record could not become a domain event.
#[derive(Debug)]
pub enum RecordError {
    EmptyPayload,
    Json(serde_json::Error),
    Validation(ValidationError),
}

impl From<serde_json::Error> for RecordError {
    fn from(err: serde_json::Error) -> Self {
        RecordError::Json(err)
    }
}

impl From<ValidationError> for RecordError {
    fn from(err: ValidationError) -> Self {
        RecordError::Validation(err)
    }
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::EmptyPayload => write!(f, "record has no payload"),
            RecordError::Json(err) => write!(f, "JSON error: {}", err),
            RecordError::Validation(err) => write!(f, "validation error: {}", err),
        }
    }
}

impl std::error::Error for RecordError {}

/// Deserializes and validates one record payload.
pub fn parse_record(payload: Option<&[u8]>) -> Result<UserEvent, RecordError> {
    let payload = payload.ok_or(RecordError::EmptyPayload)?;
    let record: UserEventRecord = serde_json::from_slice(payload)?;
    Ok(UserEvent::try_from(record)?)
}

/// Context hook that logs partition assignment changes and commit results.
/// No state changes happen on rebalance; the cache keeps whatever it holds.
pub struct LoggingConsumerContext;

impl ClientContext for LoggingConsumerContext {}

impl ConsumerContext for LoggingConsumerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                log::info!("📌 Partitions assigned: {}", partitions.count());
            }
            Rebalance::Revoke(partitions) => {
                log::info!("📌 Partitions revoked: {}", partitions.count());
            }
            Rebalance::Error(err) => {
                log::warn!("⚠️  Rebalance error: {}", err);
            }
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Assign(partitions) = rebalance {
            log::debug!("Rebalance applied ({} partitions)", partitions.count());
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(err) = result {
            log::warn!("⚠️  Offset commit failed: {}", err);
        }
    }
}

type LoggingConsumer = StreamConsumer<LoggingConsumerContext>;

/// Owns the broker subscription and the poller task.
pub struct KafkaEventConsumer {
    cancel: CancellationToken,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaEventConsumer {
    /// Builds the consumer, subscribes to the configured topic and launches
    /// the poller task.
    pub fn start(config: &KafkaConfig, bus: EventBus) -> Result<Self, ConsumerError> {
        let consumer: LoggingConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.group_id)
            .set(
                "enable.auto.commit",
                if config.enable_auto_commit { "true" } else { "false" },
            )
            .set(
                "auto.commit.interval.ms",
                config.auto_commit_interval_ms.to_string(),
            )
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                config.max_poll_interval_ms.to_string(),
            )
            .create_with_context(LoggingConsumerContext)?;

        consumer.subscribe(&[config.topic.as_str()])?;

        log::info!(
            "🔗 Subscribed to '{}' (group '{}', offset reset '{}')",
            config.topic,
            config.group_id,
            config.auto_offset_reset
        );

        let cancel = CancellationToken::new();
        let manual_commit = !config.enable_auto_commit;
        let poller = tokio::spawn(poll_loop(consumer, bus, cancel.clone(), manual_commit));

        Ok(Self {
            cancel,
            poller: Mutex::new(Some(poller)),
        })
    }

    /// Signals the poller to stop and waits for it to drain. Idempotent.
    /// When the poller exits, the underlying consumer is closed and leaves
    /// the group.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.poller.lock().unwrap().take();
        let Some(handle) = handle else {
            return;
        };

        log::info!("⏳ Waiting for consumer loop to stop");
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
            Ok(_) => log::info!("✅ Consumer loop stopped"),
            Err(_) => log::warn!(
                "⚠️  Consumer loop did not stop within {}s",
                SHUTDOWN_TIMEOUT.as_secs()
            ),
        }
    }
}

async fn poll_loop(
    consumer: LoggingConsumer,
    bus: EventBus,
    cancel: CancellationToken,
    manual_commit: bool,
) {
    log::info!("🚀 Consumer loop started");

    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = consumer.recv() => polled,
        };

        match polled {
            Ok(message) => {
                match parse_record(message.payload()) {
                    Ok(event) => {
                        bus.publish(&event).await;
                    }
                    Err(err) => {
                        // Skipped, but the offset below is still committed
                        // so the partition keeps moving.
                        log::warn!(
                            "⚠️  Skipping bad record at {} [{}] offset {}: {}",
                            message.topic(),
                            message.partition(),
                            message.offset(),
                            err
                        );
                    }
                }

                if let Err(err) = commit_record(&consumer, &message, manual_commit) {
                    log::error!(
                        "❌ Offset handling failed at {} [{}] offset {}: {}",
                        message.topic(),
                        message.partition(),
                        message.offset(),
                        err
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_PAUSE) => {}
                    }
                }
            }
            Err(err) if is_fatal(&err) => {
                log::error!("❌ Fatal broker error, stopping consumer: {}", err);
                bus.publish_error(&err).await;
                break;
            }
            Err(err) => {
                log::warn!("⚠️  Transient consume error: {}", err);
            }
        }
    }

    log::info!("✅ Consumer loop exited");
}

fn commit_record(
    consumer: &LoggingConsumer,
    message: &BorrowedMessage<'_>,
    manual_commit: bool,
) -> KafkaResult<()> {
    consumer.store_offset_from_message(message)?;
    if manual_commit {
        consumer.commit_consumer_state(CommitMode::Async)?;
    }
    Ok(())
}

fn is_fatal(err: &KafkaError) -> bool {
    match err {
        KafkaError::MessageConsumption(code) => matches!(
            code,
            RDKafkaErrorCode::Fatal
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::Authentication
        ),
        _ => false,
    }
}
