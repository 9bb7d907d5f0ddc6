// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Library core for a resilient IMAP mailbox client.

// --- Modules ---
pub mod client;
pub mod config;
pub mod error;
pub mod imap;
pub mod parser;
pub mod reconnect;
pub mod session_manager;
pub mod smtp;

pub use client::{MailboxClient, MailboxClientBuilder};
pub use config::{ConnectionConfig, EmailConfig};
pub use error::MailError;

pub mod prelude {
    // Config
    pub use crate::config::{ConnectionConfig, EmailConfig};

    // Client surface
    pub use crate::client::{MailboxClient, MailboxClientBuilder};
    pub use crate::error::MailError;
    pub use crate::smtp::{MailTransport, OutgoingAttachment, SendMessageOptions};

    // IMAP
    pub use crate::imap::events::{EventKind, Listener, Unsubscriber};
    pub use crate::imap::types::{AppMessage, Criteria, Criterion, MessageAttachment, MessageSource};
}
