// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Subscriber registry for new-mail and error events.
//
// The registry lives outside any session so that a reconnect can replay it
// onto the replacement session.

use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::MailError;
use crate::imap::session::SessionHandle;
use crate::imap::types::Criteria;
use crate::session_manager::SessionManager;

pub type NewMailHandler = Arc<dyn Fn(u32) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&MailError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMail,
    Error,
}

/// A subscribed handler. Two listeners are the same subscription only if they
/// wrap the same handler allocation.
#[derive(Clone)]
pub enum Listener {
    NewMail(NewMailHandler),
    Error(ErrorHandler),
}

impl Listener {
    pub fn new_mail<F>(handler: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        Listener::NewMail(Arc::new(handler))
    }

    pub fn error<F>(handler: F) -> Self
    where
        F: Fn(&MailError) + Send + Sync + 'static,
    {
        Listener::Error(Arc::new(handler))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Listener::NewMail(_) => EventKind::NewMail,
            Listener::Error(_) => EventKind::Error,
        }
    }

    pub fn same_as(&self, other: &Listener) -> bool {
        match (self, other) {
            (Listener::NewMail(a), Listener::NewMail(b)) => Arc::ptr_eq(a, b),
            (Listener::Error(a), Listener::Error(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener::{:?}", self.kind())
    }
}

/// Registration-ordered set of listeners, deduplicated by identity.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<Listener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the listener was already present.
    pub fn insert(&self, listener: Listener) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| l.same_as(&listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Returns `false` if the listener was not present.
    pub fn remove(&self, listener: &Listener) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !l.same_as(listener));
        listeners.len() != before
    }

    pub fn contains(&self, listener: &Listener) -> bool {
        self.listeners.lock().iter().any(|l| l.same_as(listener))
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.listeners.lock().iter().filter(|l| l.kind() == kind).count()
    }

    pub fn snapshot(&self) -> Vec<Listener> {
        self.listeners.lock().clone()
    }

    // Handlers run on a snapshot so they may subscribe or unsubscribe re-entrantly.
    pub fn emit_new_mail(&self, count: u32) {
        for listener in self.snapshot() {
            if let Listener::NewMail(handler) = listener {
                handler(count);
            }
        }
    }

    pub fn emit_error(&self, error: &MailError) {
        for listener in self.snapshot() {
            if let Listener::Error(handler) = listener {
                handler(error);
            }
        }
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("new_mail", &self.count(EventKind::NewMail))
            .field("error", &self.count(EventKind::Error))
            .finish()
    }
}

/// Attaches every registered listener to `session`. Already attached ones are skipped.
pub fn replay(registry: &ListenerSet, session: &SessionHandle) -> usize {
    registry
        .snapshot()
        .into_iter()
        .filter(|listener| session.events().insert(listener.clone()))
        .count()
}

/// Keeps subscriptions attached to whichever session is live.
pub struct EventHub {
    sessions: Arc<SessionManager>,
    registry: Arc<ListenerSet>,
}

impl EventHub {
    pub fn new(sessions: Arc<SessionManager>) -> Arc<Self> {
        let registry = sessions.registry();
        Arc::new(Self { sessions, registry })
    }

    pub fn registry(&self) -> &ListenerSet {
        &self.registry
    }

    /// Attaches `listener` to the live session, connecting if needed.
    ///
    /// A new-mail subscription is immediately told how many messages the
    /// mailbox currently holds, if any.
    pub async fn subscribe(self: &Arc<Self>, listener: Listener) -> Result<Unsubscriber, MailError> {
        // Recorded before acquiring the session so a reconnect in between replays it.
        let recorded = self.registry.insert(listener.clone());
        let session = match self.sessions.get_session().await {
            Ok(session) => session,
            Err(e) => {
                if recorded {
                    self.registry.remove(&listener);
                }
                return Err(e);
            }
        };
        session.on(listener.clone());

        if let Listener::NewMail(handler) = &listener {
            match session.search_uids(&Criteria::all()).await {
                Ok(uids) if !uids.is_empty() => handler(uids.len() as u32),
                Ok(_) => {}
                Err(e) => {
                    warn!("Initial mailbox search for new-mail subscriber failed: {}", e);
                    self.registry.remove(&listener);
                    session.off(&listener);
                    return Err(e);
                }
            }
        }

        debug!("Subscribed {:?} listener ({} registered)", listener.kind(), self.registry.len());
        Ok(Unsubscriber::new(Arc::downgrade(self), listener))
    }

    /// Records `listener` without connecting. It is attached to the current
    /// session if one is ready, and to every session created afterwards.
    pub fn register(self: &Arc<Self>, listener: Listener) -> Unsubscriber {
        self.registry.insert(listener.clone());
        if let Some(session) = self.sessions.current() {
            session.on(listener.clone());
        }
        Unsubscriber::new(Arc::downgrade(self), listener)
    }

    /// Re-attaches every registered listener to a freshly created session.
    pub fn replace_session(&self, session: &SessionHandle) {
        let attached = replay(&self.registry, session);
        debug!("Replayed {} listener(s) onto new session", attached);
    }

    fn detach(&self, listener: &Listener) {
        self.registry.remove(listener);
        if let Some(session) = self.sessions.current() {
            session.off(listener);
        }
    }

    pub fn clear(&self) {
        self.registry.clear();
    }
}

/// Removes one subscription from the registry and from the live session.
pub struct Unsubscriber {
    hub: Weak<EventHub>,
    listener: Listener,
}

impl Unsubscriber {
    fn new(hub: Weak<EventHub>, listener: Listener) -> Self {
        Self { hub, listener }
    }

    pub fn kind(&self) -> EventKind {
        self.listener.kind()
    }

    pub fn unsubscribe(self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.detach(&self.listener);
        }
    }
}

impl fmt::Debug for Unsubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscriber").field("listener", &self.listener).finish()
    }
}
