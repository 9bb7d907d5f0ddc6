// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io;

use thiserror::Error;

/// Errors surfaced by the mailbox client.
///
/// The type is `Clone` because a single failed session creation is shared by
/// every caller awaiting the same memoized result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    /// Connect, login or mailbox selection failed, or the session is gone.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Socket-level timeout. This is the class that triggers automatic reconnects.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Temporary attachment storage could not be created or written.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The server rejected a search or store command.
    #[error("Command error: {0}")]
    ProtocolCommand(String),

    /// Outgoing mail could not be built or delivered.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MailError {
    /// Whether this error belongs to the socket-timeout class that warrants a reconnect.
    pub fn is_socket_timeout(&self) -> bool {
        matches!(self, MailError::Timeout(_))
    }
}

impl From<async_imap::error::Error> for MailError {
    fn from(err: async_imap::error::Error) -> Self {
        match err {
            async_imap::error::Error::Io(e) => MailError::from(e),
            async_imap::error::Error::No(msg) => MailError::ProtocolCommand(msg),
            async_imap::error::Error::Bad(msg) => MailError::ProtocolCommand(msg),
            async_imap::error::Error::Parse(e) => MailError::Parse(e.to_string()),
            async_imap::error::Error::Validate(e) => MailError::ProtocolCommand(e.to_string()),
            _ => MailError::Connection(err.to_string()),
        }
    }
}

impl From<io::Error> for MailError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => MailError::Timeout(err.to_string()),
            _ => MailError::Connection(err.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for MailError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        MailError::Timeout(err.to_string())
    }
}

impl From<tempfile::PersistError> for MailError {
    fn from(err: tempfile::PersistError) -> Self {
        MailError::Storage(err.to_string())
    }
}

impl From<url::ParseError> for MailError {
    fn from(err: url::ParseError) -> Self {
        MailError::Config(format!("Invalid mailbox URL: {}", err))
    }
}

impl From<config::ConfigError> for MailError {
    fn from(err: config::ConfigError) -> Self {
        MailError::Config(err.to_string())
    }
}

impl From<lettre::error::Error> for MailError {
    fn from(err: lettre::error::Error) -> Self {
        MailError::Transport(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        MailError::Transport(err.to_string())
    }
}

impl From<lettre::address::AddressError> for MailError {
    fn from(err: lettre::address::AddressError) -> Self {
        MailError::Transport(format!("Invalid address: {}", err))
    }
}
