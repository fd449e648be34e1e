// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Streaming transport for execution events.
//!
//! Bridges an event-bus subscription, a cancellation signal and a
//! keep-alive ticker into one ordered stream of frames. Two independent
//! triggers tear the stream down gracefully: the consumer going away
//! (client disconnect) and the cancel signal firing. Both complete the
//! stream, neither errors it, and racing them is safe because teardown is
//! the pump task exiting exactly once.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::domain::events::StreamEvent;
use crate::domain::execution::ExecutionId;
use crate::domain::cancellation::CancelSignal;
use crate::infrastructure::event_bus::{EventBus, EventBusError};

/// Default keep-alive period; callers usually inject the configured one.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Ordered stream of [`StreamEvent`] frames for one execution.
pub struct ExecutionEventStream {
    inner: ReceiverStream<StreamEvent>,
}

impl ExecutionEventStream {
    /// Open a stream over `execution_id`'s events.
    ///
    /// While the stream is idle an inert keep-alive frame is emitted every
    /// `keep_alive_interval` so intermediaries do not time the connection
    /// out. The ticker restarts after every payload frame.
    pub fn open(
        event_bus: &EventBus,
        execution_id: ExecutionId,
        cancel: CancelSignal,
        keep_alive_interval: Duration,
    ) -> Self {
        let mut events = event_bus.subscribe_execution(execution_id);
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + keep_alive_interval;
            let mut keep_alive = tokio::time::interval_at(start, keep_alive_interval);
            keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let cancelled = cancel.cancelled();
            tokio::pin!(cancelled);

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            if tx.send(StreamEvent::Event(event)).await.is_err() {
                                // Consumer dropped: client disconnect.
                                debug!(execution_id = %execution_id, "Stream consumer went away");
                                break;
                            }
                            keep_alive.reset();
                        }
                        Err(EventBusError::Lagged(n)) => {
                            warn!(execution_id = %execution_id, lagged = n, "Stream lagged, continuing");
                        }
                        Err(_) => {
                            debug!(execution_id = %execution_id, "Event bus closed, completing stream");
                            break;
                        }
                    },
                    reason = &mut cancelled => {
                        debug!(execution_id = %execution_id, %reason, "Stream cancelled, completing");
                        break;
                    }
                    _ = keep_alive.tick() => {
                        if tx.send(StreamEvent::KeepAlive).await.is_err() {
                            break;
                        }
                    }
                }
            }
            // Dropping `events` here releases the bus subscription; the
            // keep-alive ticker dies with the task. Nothing further fires.
        });

        Self {
            inner: ReceiverStream::new(rx),
        }
    }
}

impl Stream for ExecutionEventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::ExecutionEvent;
    use crate::domain::cancellation::CancelReason;
    use futures::StreamExt;
    use chrono::Utc;

    fn started(execution_id: ExecutionId) -> ExecutionEvent {
        ExecutionEvent::ExecutionStarted {
            execution_id,
            agent_key: "primary".to_string(),
            started_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_events_pass_through_in_order() {
        let bus = EventBus::new(16);
        let execution_id = ExecutionId::new();
        let mut stream = ExecutionEventStream::open(
            &bus,
            execution_id,
            CancelSignal::new(),
            DEFAULT_KEEP_ALIVE,
        );
        tokio::task::yield_now().await;

        bus.publish(started(execution_id));
        bus.publish(ExecutionEvent::MessageDelta {
            execution_id,
            content: "one".to_string(),
        });
        bus.publish(ExecutionEvent::MessageDelta {
            execution_id,
            content: "two".to_string(),
        });

        assert!(matches!(
            stream.next().await,
            Some(StreamEvent::Event(ExecutionEvent::ExecutionStarted { .. }))
        ));
        match stream.next().await {
            Some(StreamEvent::Event(ExecutionEvent::MessageDelta { content, .. })) => {
                assert_eq!(content, "one");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        match stream.next().await {
            Some(StreamEvent::Event(ExecutionEvent::MessageDelta { content, .. })) => {
                assert_eq!(content, "two");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_emitted_while_idle() {
        let bus = EventBus::new(16);
        let execution_id = ExecutionId::new();
        let mut stream = ExecutionEventStream::open(
            &bus,
            execution_id,
            CancelSignal::new(),
            Duration::from_secs(30),
        );
        tokio::task::yield_now().await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(matches!(stream.next().await, Some(StreamEvent::KeepAlive)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_completes_stream_and_stops_timers() {
        let bus = EventBus::new(16);
        let execution_id = ExecutionId::new();
        let cancel = CancelSignal::new();
        let mut stream = ExecutionEventStream::open(
            &bus,
            execution_id,
            cancel.clone(),
            Duration::from_secs(30),
        );
        tokio::task::yield_now().await;
        assert_eq!(bus.subscriber_count(), 1);

        cancel.cancel(CancelReason::UserCancelled);
        assert_eq!(stream.next().await, None);

        // Upstream subscription released; no keep-alive fires later.
        tokio::task::yield_now().await;
        assert_eq!(bus.subscriber_count(), 0);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_payload_after_disconnect() {
        let bus = EventBus::new(16);
        let execution_id = ExecutionId::new();
        let stream = ExecutionEventStream::open(
            &bus,
            execution_id,
            CancelSignal::new(),
            Duration::from_secs(30),
        );
        tokio::task::yield_now().await;
        assert_eq!(bus.subscriber_count(), 1);

        // Client disconnect: the consumer side goes away mid-stream.
        drop(stream);
        bus.publish(started(execution_id));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(bus.subscriber_count(), 0, "subscription leaked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_disconnect_and_cancel_is_safe() {
        let bus = EventBus::new(16);
        let execution_id = ExecutionId::new();
        let cancel = CancelSignal::new();
        let stream = ExecutionEventStream::open(
            &bus,
            execution_id,
            cancel.clone(),
            Duration::from_secs(30),
        );
        tokio::task::yield_now().await;

        cancel.cancel(CancelReason::ClientDisconnected);
        drop(stream);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(bus.subscriber_count(), 0);
    }
}
