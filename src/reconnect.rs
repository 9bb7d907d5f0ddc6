// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::MailError;
use crate::imap::events::{EventHub, Listener, Unsubscriber};
use crate::imap::session::SessionHandle;
use crate::session_manager::SessionManager;

/// Decides whether an error observed on the session warrants a reconnect.
pub type ErrorPredicate = Arc<dyn Fn(&MailError) -> bool + Send + Sync>;

struct ReconnectState {
    sessions: Arc<SessionManager>,
    hub: Arc<EventHub>,
    triggered: AtomicBool,
}

impl ReconnectState {
    async fn run(&self, safely: bool) -> Result<SessionHandle, MailError> {
        let _gate = self.sessions.lock_for_reconnect().await;
        info!("Reconnecting IMAP session (safely: {})", safely);

        self.sessions.disconnect_current(safely).await;
        let session = self.sessions.replace_session().await?;
        self.hub.replace_session(&session);

        info!("IMAP session reconnected");
        Ok(session)
    }
}

/// Replaces the session on a timer and on transient errors, keeping every
/// subscriber attached.
///
/// The timer task is owned by this value and stops when it is cancelled or dropped.
pub struct ReconnectPolicy {
    state: Arc<ReconnectState>,
    timer: Mutex<Option<JoinHandle<()>>>,
    error_subscription: Mutex<Option<Unsubscriber>>,
}

impl ReconnectPolicy {
    pub fn new(sessions: Arc<SessionManager>, hub: Arc<EventHub>) -> Self {
        Self {
            state: Arc::new(ReconnectState {
                sessions,
                hub,
                triggered: AtomicBool::new(false),
            }),
            timer: Mutex::new(None),
            error_subscription: Mutex::new(None),
        }
    }

    /// Disconnects the current session, creates a new one and replays subscribers onto it.
    pub async fn reconnect(&self, safely: bool) -> Result<SessionHandle, MailError> {
        self.state.run(safely).await
    }

    /// Arms a repeating reconnect every `period`. Re-arming replaces the previous timer.
    pub fn schedule_interval(&self, period: Duration) {
        let state = Arc::downgrade(&self.state);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else { break };
                debug!("Periodic reconnect tick");
                if let Err(e) = state.run(true).await {
                    warn!("Periodic reconnect failed: {}", e);
                }
            }
        });

        if let Some(previous) = self.timer.lock().replace(task) {
            previous.abort();
        }
    }

    /// Reconnects out-of-band whenever the session reports an error matching `predicate`.
    ///
    /// Errors arriving while such a reconnect is running are coalesced into it.
    pub fn on_transient_error(&self, predicate: ErrorPredicate) {
        let state: Weak<ReconnectState> = Arc::downgrade(&self.state);
        let listener = Listener::error(move |error| {
            if !predicate(error) {
                return;
            }
            let Some(state) = state.upgrade() else { return };
            if state.triggered.swap(true, Ordering::SeqCst) {
                debug!("Reconnect already pending, ignoring: {}", error);
                return;
            }

            warn!("Transient session error, reconnecting: {}", error);
            tokio::spawn(async move {
                if let Err(e) = state.run(true).await {
                    warn!("Error-triggered reconnect failed: {}", e);
                }
                state.triggered.store(false, Ordering::SeqCst);
            });
        });

        let unsubscriber = self.state.hub.register(listener);
        if let Some(previous) = self.error_subscription.lock().replace(unsubscriber) {
            previous.unsubscribe();
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the timer and drops the error subscription.
    pub fn cancel(&self) {
        if let Some(task) = self.timer.lock().take() {
            task.abort();
        }
        if let Some(unsubscriber) = self.error_subscription.lock().take() {
            unsubscriber.unsubscribe();
        }
    }
}

impl Drop for ReconnectPolicy {
    fn drop(&mut self) {
        if let Some(task) = self.timer.get_mut().take() {
            task.abort();
        }
    }
}
