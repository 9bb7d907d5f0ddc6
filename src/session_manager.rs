// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::time::timeout;

use crate::config::ConnectionConfig;
use crate::error::MailError;
use crate::imap::events::{replay, ListenerSet};
use crate::imap::session::{Connector, SessionHandle};

/// Result type for session operations
pub type SessionResult<T> = Result<T, MailError>;

type PendingSession = Shared<BoxFuture<'static, SessionResult<SessionHandle>>>;

/// Owns the single live session of a client.
///
/// The session is created lazily and memoized: every caller that arrives while
/// a creation is in flight awaits the same result, so racing operations never
/// open two connections. A failed creation stays memoized until
/// [`SessionManager::force_new_session`] replaces it.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    config: Arc<ConnectionConfig>,
    registry: Arc<ListenerSet>,
    slot: Mutex<Option<PendingSession>>,
    // Readers acquire sessions, the writer is a reconnect or disconnect.
    gate: RwLock<()>,
    creations: Arc<AtomicUsize>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Arc<Self> {
        Arc::new(Self {
            connector,
            config: Arc::new(config),
            registry: Arc::new(ListenerSet::new()),
            slot: Mutex::new(None),
            gate: RwLock::new(()),
            creations: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Listeners attached to every session this manager creates.
    pub fn registry(&self) -> Arc<ListenerSet> {
        Arc::clone(&self.registry)
    }

    /// Number of connection attempts started so far.
    pub fn creation_count(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    /// Returns the live session, creating it on first use.
    pub async fn get_session(&self) -> SessionResult<SessionHandle> {
        let _gate = self.gate.read().await;
        let pending = {
            let mut slot = self.slot.lock();
            slot.get_or_insert_with(|| self.start_creation()).clone()
        };
        pending.await
    }

    /// Discards whatever is memoized and connects again.
    pub async fn force_new_session(&self) -> SessionResult<SessionHandle> {
        let _gate = self.gate.read().await;
        self.replace_session().await
    }

    /// Starts connecting in the background so the first operation finds the session ready.
    pub fn prime(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.get_session().await {
                error!("Initial IMAP session for {} failed: {}", manager.config.user, e);
            }
        });
    }

    /// The session if it is already connected, without waiting or connecting.
    pub fn current(&self) -> Option<SessionHandle> {
        self.slot
            .lock()
            .as_ref()
            .and_then(|pending| pending.peek())
            .and_then(|result| result.as_ref().ok())
            .cloned()
    }

    /// Exclusive access for reconnects. Session acquisition waits until the guard drops.
    pub async fn lock_for_reconnect(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    /// Replaces the slot with a new creation and awaits it.
    ///
    /// Callers must hold either side of the reconnect gate.
    pub(crate) async fn replace_session(&self) -> SessionResult<SessionHandle> {
        let pending = self.start_creation();
        *self.slot.lock() = Some(pending.clone());
        pending.await
    }

    /// Empties the slot, returning the session if it had finished connecting.
    pub(crate) fn take_current(&self) -> Option<SessionHandle> {
        self.slot
            .lock()
            .take()
            .and_then(|pending| pending.peek().cloned())
            .and_then(Result::ok)
    }

    /// Disconnects the live session. The next operation connects again.
    pub async fn disconnect(&self, safely: bool) {
        let _gate = self.gate.write().await;
        self.disconnect_current(safely).await;
    }

    pub(crate) async fn disconnect_current(&self, safely: bool) {
        match self.take_current() {
            Some(session) => teardown(&session, safely).await,
            None => debug!("No connected session to disconnect"),
        }
    }

    fn start_creation(&self) -> PendingSession {
        let attempt = self.creations.fetch_add(1, Ordering::SeqCst) + 1;
        let connector = Arc::clone(&self.connector);
        let config = Arc::clone(&self.config);
        let registry = Arc::clone(&self.registry);

        async move {
            debug!("Creating IMAP session (attempt {})", attempt);
            create_session(connector.as_ref(), &config, &registry).await
        }
        .boxed()
        .shared()
    }
}

/// Connects, selects the configured mailbox and attaches registered listeners.
async fn create_session(
    connector: &dyn Connector,
    config: &ConnectionConfig,
    registry: &ListenerSet,
) -> SessionResult<SessionHandle> {
    info!("Connecting to {}:{} as '{}'", config.host, config.port, config.user);

    let session = connector.connect(config).await.map_err(into_connection_error)?;

    match session.open_mailbox(&config.mailbox).await {
        Ok(status) => {
            info!("Selected mailbox '{}' ({} messages)", status.name, status.exists);
        }
        Err(e) => {
            error!("Failed to select mailbox '{}': {}", config.mailbox, e);
            session.destroy();
            return Err(into_connection_error(e));
        }
    }

    replay(registry, &session);
    Ok(session)
}

fn into_connection_error(err: MailError) -> MailError {
    match err {
        MailError::Connection(_) => err,
        other => MailError::Connection(other.to_string()),
    }
}

/// How long a forced disconnect lets CLOSE run before tearing the transport down.
pub const FORCED_CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Detaches all listeners and closes the mailbox, then ends or destroys the session.
pub(crate) async fn teardown(session: &SessionHandle, safely: bool) {
    session.events().clear();

    if safely {
        if let Err(e) = session.close_mailbox().await {
            warn!("Failed to close mailbox during disconnect: {}", e);
        }
        if let Err(e) = session.end().await {
            warn!("Graceful session end failed, destroying transport: {}", e);
            session.destroy();
        }
    } else {
        // CLOSE queues behind in-flight commands, so it only gets a short grace period.
        match timeout(FORCED_CLOSE_GRACE, session.close_mailbox()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close mailbox during forced disconnect: {}", e),
            Err(_) => warn!("Mailbox close did not finish within {:?}, destroying anyway", FORCED_CLOSE_GRACE),
        }
        debug!("Destroying session transport");
        session.destroy();
    }
}
