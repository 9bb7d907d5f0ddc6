// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Seams between the session core and the IMAP protocol library.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::MailError;
use crate::imap::events::{Listener, ListenerSet};
use crate::imap::types::{Criteria, LabelOperation, MessageSource, RawMessage};

/// Shared handle to a live protocol session.
pub type SessionHandle = Arc<dyn RawSession>;

/// Result of selecting a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxStatus {
    pub name: String,
    /// Number of messages in the mailbox at selection time.
    pub exists: u32,
}

/// Opens authenticated protocol sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects and logs in. No mailbox is selected on the returned session.
    async fn connect(&self, config: &ConnectionConfig) -> Result<SessionHandle, MailError>;
}

/// An authenticated protocol session.
#[async_trait]
pub trait RawSession: Send + Sync {
    async fn open_mailbox(&self, name: &str) -> Result<MailboxStatus, MailError>;

    /// Searches the selected mailbox and fetches full bodies and structure of every match.
    async fn search(&self, criteria: &Criteria) -> Result<Vec<RawMessage>, MailError>;

    /// Searches the selected mailbox, returning only UIDs.
    async fn search_uids(&self, criteria: &Criteria) -> Result<Vec<u32>, MailError>;

    /// The provider-specific label extension, when the server advertises it.
    fn labels(&self) -> Option<&dyn LabelExtension>;

    /// Event source of this session. Handlers attached here are invoked from the session's I/O task.
    fn events(&self) -> &ListenerSet;

    async fn close_mailbox(&self) -> Result<(), MailError>;

    /// Graceful logout; commands already queued complete first.
    async fn end(&self) -> Result<(), MailError>;

    /// Tears down the transport immediately. Pending commands fail.
    fn destroy(&self);

    fn on(&self, listener: Listener) {
        self.events().insert(listener);
    }

    fn off(&self, listener: &Listener) {
        self.events().remove(listener);
    }
}

impl fmt::Debug for dyn RawSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSession")
            .field("labels", &self.labels().is_some())
            .field("events", self.events())
            .finish()
    }
}

/// Gmail-style label mutation (`X-GM-EXT-1`).
#[async_trait]
pub trait LabelExtension: Send + Sync {
    async fn store_labels(
        &self,
        source: &MessageSource,
        operation: LabelOperation,
        labels: &[String],
    ) -> Result<(), MailError>;
}
