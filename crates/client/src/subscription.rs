//! Scoped subscriptions to server events.

use crate::bus::EventBusClient;
use referral_core::ServerEvent;
use std::future::Future;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;

/// Handle tying a handler to its owner's lifetime. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    topics: Vec<ServerEvent>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn topics(&self) -> &[ServerEvent] {
        &self.topics
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Run `handler` for every event in `topics`.
///
/// Handlers run one at a time, in emission order. Matching events that queue up while a
/// handler is running are coalesced into a single call carrying the one with the most visible
/// load mode (the most recent among equals). If the
/// subscription falls behind the bus buffer, the handler runs once with the first topic so the
/// owner can catch up.
///
/// # Arguments
/// * `bus` - Shared event bus.
/// * `topics` - Topics the owner reacts to. Anything else is ignored.
/// * `handler` - Async callback, typically a re-fetch.
///
/// # Returns
/// A [`Subscription`]; keep it alive for as long as the owner is mounted.
pub fn on_server_event<F, Fut>(
    bus: &EventBusClient,
    topics: &[ServerEvent],
    mut handler: F,
) -> Subscription
where
    F: FnMut(ServerEvent) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut rx = bus.subscribe();
    let wanted = topics.to_vec();
    let filter = wanted.clone();

    let task = tokio::spawn(async move {
        loop {
            let mut next = match rx.recv().await {
                Ok(event) if filter.contains(&event) => event,
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => match filter.first() {
                    Some(first) => {
                        tracing::warn!(missed, "subscription lagged, catching up");
                        *first
                    }
                    None => continue,
                },
                Err(RecvError::Closed) => break,
            };

            let mut coalesced = 0usize;
            loop {
                match rx.try_recv() {
                    Ok(event) if filter.contains(&event) => {
                        // Keep the most visible refresh; among equals, the latest.
                        if strength(event) >= strength(next) {
                            next = event;
                        }
                        coalesced += 1;
                    }
                    Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
            if coalesced > 0 {
                tracing::debug!(coalesced, topic = next.topic(), "coalesced queued events");
            }

            handler(next).await;
        }
    });

    Subscription {
        topics: wanted,
        task,
    }
}

fn strength(event: ServerEvent) -> u8 {
    event.category().load_mode().strength()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusOptions;
    use referral_core::{LoadMode, ViewId};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn bus() -> EventBusClient {
        EventBusClient::with_options("http://127.0.0.1:9", BusOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn only_requested_topics_are_handled() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = on_server_event(&bus, &[ServerEvent::FileRejected], move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
            }
        });

        bus.inject(ServerEvent::FileApproved);
        tokio::task::yield_now().await;
        bus.inject(ServerEvent::FileRejected);

        assert_eq!(rx.recv().await, Some(ServerEvent::FileRejected));
        assert!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_events_are_coalesced() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = on_server_event(
            &bus,
            &[ServerEvent::FileSubmittedFromPractice, ServerEvent::FileReferred],
            move |event| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event);
                }
            },
        );

        // The handler task has not run yet, so all three are queued.
        bus.inject(ServerEvent::FileSubmittedFromPractice);
        bus.inject(ServerEvent::FileSubmittedFromPractice);
        bus.inject(ServerEvent::FileReferred);

        assert_eq!(rx.recv().await, Some(ServerEvent::FileReferred));
        assert!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn coalescing_keeps_the_background_handoff() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = on_server_event(
            &bus,
            ViewId::CreatePatientRequest.topics(),
            move |event| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event);
                }
            },
        );

        bus.inject(ServerEvent::FileSubmittedFromPractice);
        bus.inject(ServerEvent::DiagnosisFormAdded);

        let handled = rx.recv().await.expect("one coalesced call");
        assert_eq!(handled, ServerEvent::FileSubmittedFromPractice);
        assert_eq!(handled.category().load_mode(), LoadMode::Background);
        assert!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_subscription_unsubscribes() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = on_server_event(&bus, &[ServerEvent::PaymentCompleted], move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
            }
        });
        assert!(sub.is_active());
        drop(sub);
        tokio::task::yield_now().await;

        bus.inject(ServerEvent::PaymentCompleted);
        // The sender lives in the aborted task, so the channel closes instead of delivering.
        assert_eq!(rx.recv().await, None);
    }
}
