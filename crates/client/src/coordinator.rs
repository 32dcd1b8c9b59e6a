//! List Refresh Coordinator.
//!
//! Mounting a screen subscribes it to the topics its view declares. Each matching event turns
//! into a [`RefreshSignal`] for that view alone, and the screen re-fetches with the signal's
//! load mode:
//!
//! | category            | effect                                         |
//! |---------------------|------------------------------------------------|
//! | `FileHandoff`       | re-fetch with a background indicator           |
//! | `FileDetailChanged` | re-fetch silently                              |
//! | `PaymentCompleted`  | re-fetch the pending file detail silently      |

use crate::bus::EventBusClient;
use crate::screen::Screen;
use crate::subscription::{on_server_event, Subscription};
use referral_core::{LoadMode, RefreshSignal, ViewId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct Mounted {
    screen: Arc<dyn Screen>,
    _subscription: Subscription,
}

pub struct RefreshCoordinator {
    bus: EventBusClient,
    mounted: Mutex<HashMap<ViewId, Mounted>>,
}

impl RefreshCoordinator {
    pub fn new(bus: EventBusClient) -> Self {
        Self {
            bus,
            mounted: Mutex::new(HashMap::new()),
        }
    }

    /// Mount `screen`: subscribe it to its view's topics, then run the initial blocking load.
    ///
    /// A screen already mounted for the same view is torn down and replaced.
    ///
    /// # Returns
    /// Whether the initial load succeeded.
    pub async fn mount(&self, screen: Arc<dyn Screen>) -> bool {
        let view = screen.view_id();
        let target = screen.clone();
        let subscription = on_server_event(&self.bus, view.topics(), move |event| {
            let target = target.clone();
            async move {
                let Some(signal) = RefreshSignal::for_view(event, view) else {
                    return;
                };
                tracing::debug!(
                    view = %signal.view,
                    topic = signal.event.topic(),
                    mode = ?signal.mode,
                    "refresh signal"
                );
                target.refresh(signal.mode).await;
            }
        });

        let replaced = self
            .lock()
            .insert(
                view,
                Mounted {
                    screen: screen.clone(),
                    _subscription: subscription,
                },
            );
        if let Some(previous) = replaced {
            previous.screen.teardown();
        }
        tracing::debug!(%view, "screen mounted");

        screen.refresh(LoadMode::Blocking).await
    }

    /// Unmount `view`: drop its subscription and ignore any response still in flight.
    pub fn unmount(&self, view: ViewId) -> bool {
        match self.lock().remove(&view) {
            Some(mounted) => {
                mounted.screen.teardown();
                tracing::debug!(%view, "screen unmounted");
                true
            }
            None => false,
        }
    }

    /// Unmount everything, e.g. on sign-out.
    pub fn unmount_all(&self) {
        let drained: Vec<Mounted> = self.lock().drain().map(|(_, m)| m).collect();
        for mounted in drained {
            mounted.screen.teardown();
        }
    }

    pub fn is_mounted(&self, view: ViewId) -> bool {
        self.lock().contains_key(&view)
    }

    pub fn mounted_views(&self) -> Vec<ViewId> {
        self.lock().keys().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ViewId, Mounted>> {
        self.mounted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.unmount_all();
    }
}
