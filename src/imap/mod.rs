// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub mod client;
pub mod events;
pub mod session;
pub mod types;

pub use client::{ImapConnector, ImapSession};
pub use events::{EventHub, EventKind, Listener, ListenerSet, Unsubscriber};
pub use session::{Connector, LabelExtension, MailboxStatus, RawSession, SessionHandle};
pub use types::{AppMessage, Criteria, Criterion, LabelOperation, MessageAttachment, MessageSource, RawMessage};
