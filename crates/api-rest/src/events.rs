//! Event hub behind both event channel transports.
//!
//! Every emitted topic gets a monotonically increasing cursor. Streaming subscribers receive
//! them through a broadcast channel; polling clients read the bounded log by cursor and park on
//! a `Notify` until something newer arrives.

use api_shared::PollRes;
use referral_core::ServerEvent;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

/// One emitted topic with its position in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Published {
    pub cursor: u64,
    pub event: ServerEvent,
}

#[derive(Debug, Default)]
struct EventLog {
    last_cursor: u64,
    entries: VecDeque<Published>,
}

#[derive(Debug)]
pub struct EventHub {
    tx: broadcast::Sender<Published>,
    log: Mutex<EventLog>,
    notify: Notify,
    capacity: usize,
}

impl EventHub {
    /// # Arguments
    /// * `capacity` - Broadcast buffer size and the number of topics the poll log retains.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            log: Mutex::new(EventLog::default()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Append `event` to the log and fan it out. Returns its cursor.
    pub fn emit(&self, event: ServerEvent) -> u64 {
        let published = {
            let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
            log.last_cursor += 1;
            let published = Published {
                cursor: log.last_cursor,
                event,
            };
            log.entries.push_back(published);
            while log.entries.len() > self.capacity {
                log.entries.pop_front();
            }
            published
        };

        // No streaming subscribers is fine: pollers read the log.
        let streamed = self.tx.send(published).unwrap_or(0);
        self.notify.notify_waiters();
        tracing::debug!(
            topic = event.topic(),
            cursor = published.cursor,
            streamed,
            "event emitted"
        );
        published.cursor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }

    pub fn latest_cursor(&self) -> u64 {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).last_cursor
    }

    /// Topics emitted after `cursor`, oldest first.
    ///
    /// A cursor from the future (the hub restarted) yields no topics and the current cursor, so
    /// the client resynchronises.
    pub fn since(&self, cursor: u64) -> PollRes {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        if cursor >= log.last_cursor {
            return PollRes {
                cursor: log.last_cursor,
                events: Vec::new(),
            };
        }

        PollRes {
            cursor: log.last_cursor,
            events: log
                .entries
                .iter()
                .filter(|p| p.cursor > cursor)
                .map(|p| p.event.topic().to_string())
                .collect(),
        }
    }

    /// Long-poll: return as soon as something newer than `cursor` exists, or after `timeout`.
    ///
    /// Without a cursor the call returns immediately with the current cursor and no topics;
    /// that is how a client establishes its starting point.
    pub async fn wait_since(&self, cursor: Option<u64>, timeout: Duration) -> PollRes {
        let Some(cursor) = cursor else {
            return PollRes {
                cursor: self.latest_cursor(),
                events: Vec::new(),
            };
        };

        // Register before checking so an emit between the check and the await is not lost.
        let notified = self.notify.notified();
        let ready = self.since(cursor);
        if !ready.events.is_empty() || ready.cursor < cursor {
            return ready;
        }

        let _ = tokio::time::timeout(timeout, notified).await;
        self.since(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn since_returns_topics_after_cursor() {
        let hub = EventHub::new(8);
        hub.emit(ServerEvent::FileSubmittedFromPractice);
        let second = hub.emit(ServerEvent::FileRejected);
        hub.emit(ServerEvent::PaymentCompleted);

        let res = hub.since(second - 1);
        assert_eq!(res.cursor, 3);
        assert_eq!(res.events, vec!["FILE_REJECTED", "PAYMENT_COMPLETED"]);
        assert!(hub.since(3).events.is_empty());
    }

    #[test]
    fn log_is_bounded() {
        let hub = EventHub::new(2);
        for _ in 0..5 {
            hub.emit(ServerEvent::FileApproved);
        }
        let res = hub.since(0);
        assert_eq!(res.cursor, 5);
        assert_eq!(res.events.len(), 2);
    }

    #[tokio::test]
    async fn first_poll_returns_current_cursor() {
        let hub = EventHub::new(8);
        hub.emit(ServerEvent::FileReferred);
        let res = hub.wait_since(None, Duration::from_secs(30)).await;
        assert_eq!(res, PollRes { cursor: 1, events: vec![] });
    }

    #[tokio::test]
    async fn long_poll_wakes_on_emit() {
        let hub = Arc::new(EventHub::new(8));
        let waiter = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.wait_since(Some(0), Duration::from_secs(30)).await })
        };

        tokio::task::yield_now().await;
        hub.emit(ServerEvent::FileMovedToDoctor);

        let res = waiter.await.expect("poll task");
        assert_eq!(res.events, vec!["FILE_MOVED_TO_DOCTOR"]);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_times_out_empty() {
        let hub = EventHub::new(8);
        let res = hub.wait_since(Some(0), Duration::from_secs(25)).await;
        assert_eq!(res, PollRes { cursor: 0, events: vec![] });
    }

    #[tokio::test]
    async fn streaming_subscribers_see_cursors() {
        let hub = EventHub::new(8);
        let mut rx = hub.subscribe();
        hub.emit(ServerEvent::PatientConsentSigned);
        let got = rx.recv().await.expect("published");
        assert_eq!(got.cursor, 1);
        assert_eq!(got.event, ServerEvent::PatientConsentSigned);
    }
}
