//! Aggregator: event observer plus periodic flusher
//!
//! Owns the counter cache and drives the drain cycle. As an observer it is
//! non-blocking: `on_next` is a per-key atomic increment and never waits
//! on a flush in progress. The flush cycle is: snapshot → one store
//! transaction → subtract the drained counts from the cache.
//!
//! A single timer task fires every `flush_interval`; the first fire is one
//! interval after construction. Ticks that land while a flush is still
//! running wait on the flush mutex rather than being dropped, so sustained
//! back-pressure can delay flushes but never skip counters.

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::cache::AggregationCache;
use crate::events::{EventObserver, ObserverResult, UserEvent};
use crate::store::{StatsStore, StoreError};

pub struct EventAggregator {
    cache: AggregationCache,
    store: Arc<dyn StatsStore>,
    flush_lock: Mutex<()>,
    timer_cancel: CancellationToken,
}

impl EventAggregator {
    /// Builds the aggregator and starts its flush timer.
    pub fn new(store: Arc<dyn StatsStore>, flush_interval: Duration) -> Arc<Self> {
        let aggregator = Arc::new(Self {
            cache: AggregationCache::new(),
            store,
            flush_lock: Mutex::new(()),
            timer_cancel: CancellationToken::new(),
        });

        tokio::spawn(flush_timer(
            Arc::downgrade(&aggregator),
            flush_interval,
            aggregator.timer_cancel.clone(),
        ));

        aggregator
    }

    pub fn cache(&self) -> &AggregationCache {
        &self.cache
    }

    /// Drains the cache into one store transaction.
    ///
    /// Returns the number of counters flushed. On store failure nothing is
    /// drained; the counters stay cached and the next tick retries them.
    /// Concurrent callers serialize on the flush mutex; `on_next` does not.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        if self.cache.is_empty() {
            return Ok(0);
        }

        let _flush = self.flush_lock.lock().await;

        let snapshot = self.cache.snapshot();
        if snapshot.is_empty() {
            return Ok(0);
        }

        if let Err(err) = self.store.upsert_batch(&snapshot).await {
            log::error!(
                "❌ Flush failed, {} counters stay cached for retry: {}",
                snapshot.len(),
                err
            );
            return Err(err);
        }

        self.cache.remove_drained(&snapshot);
        log::debug!("✅ Flushed {} counters to the store", snapshot.len());

        Ok(snapshot.len())
    }

    /// Stops the periodic timer and runs one final drain. Idempotent; also
    /// reachable through `on_completed`.
    pub async fn shutdown(&self) -> Result<usize, StoreError> {
        self.timer_cancel.cancel();
        self.flush().await
    }
}

impl Drop for EventAggregator {
    fn drop(&mut self) {
        self.timer_cancel.cancel();
    }
}

#[async_trait]
impl EventObserver for EventAggregator {
    async fn on_next(&self, event: &UserEvent) -> ObserverResult {
        let count = self.cache.increment(event.user_id(), event.event_type());
        log::debug!(
            "📈 {} '{}' -> {}",
            event.user_id(),
            event.event_type(),
            count
        );
        Ok(())
    }

    async fn on_error(&self, error: &(dyn std::error::Error + Send + Sync)) -> ObserverResult {
        log::error!("❌ Upstream error reached the aggregator: {}", error);
        Ok(())
    }

    async fn on_completed(&self) -> ObserverResult {
        log::info!("🏁 Event stream completed, draining remaining counters");
        let flushed = self.shutdown().await?;
        log::info!("✅ Final drain wrote {} counters", flushed);
        Ok(())
    }
}

async fn flush_timer(
    aggregator: Weak<EventAggregator>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut timer = tokio::time::interval(period);
    // The first tick of a tokio interval completes immediately; consume it
    // so the first flush fires one full interval after construction.
    timer.tick().await;

    log::info!("⏰ Flush timer started (every {}s)", period.as_secs());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                let Some(aggregator) = aggregator.upgrade() else {
                    break;
                };
                if let Err(err) = aggregator.flush().await {
                    log::error!("❌ Periodic flush failed: {}", err);
                }
            }
        }
    }

    log::info!("⏰ Flush timer stopped");
}
