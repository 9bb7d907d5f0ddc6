// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};

use crate::config::{ConnectionConfig, EmailConfig};
use crate::error::MailError;
use crate::imap::client::ImapConnector;
use crate::imap::events::{EventHub, Listener, NewMailHandler, Unsubscriber};
use crate::imap::session::Connector;
use crate::imap::types::{AppMessage, Criteria, LabelOperation, MessageSource};
use crate::parser::attachment::discard;
use crate::parser::MessageParser;
use crate::reconnect::{ErrorPredicate, ReconnectPolicy};
use crate::session_manager::SessionManager;
use crate::smtp::{MailTransport, SendMessageOptions, SmtpSettings, SmtpTransport};

/// Builder for [`MailboxClient`].
pub struct MailboxClientBuilder {
    config: EmailConfig,
    on_new_mail: Option<NewMailHandler>,
    connector: Option<Arc<dyn Connector>>,
    transport: Option<Arc<dyn MailTransport>>,
    parser: Option<MessageParser>,
}

impl MailboxClientBuilder {
    /// Handler subscribed right after construction, like [`MailboxClient::on_new_mail_received`].
    pub fn on_new_mail<F>(mut self, handler: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on_new_mail = Some(Arc::new(handler));
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn parser(mut self, parser: MessageParser) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Creates the client and starts connecting in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<MailboxClient, MailError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(MailError::Config("MailboxClient must be built inside a Tokio runtime".to_string()));
        }

        let connection = ConnectionConfig::from_email_config(&self.config)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(SmtpTransport::new(&SmtpSettings::derive(&connection))?),
        };
        let connector = self.connector.unwrap_or_else(|| Arc::new(ImapConnector::new()));
        info!("Creating mailbox client for '{}' ({})", connection.user, connection.mailbox);

        let sessions = SessionManager::new(connector, connection);
        let hub = EventHub::new(Arc::clone(&sessions));
        let policy = ReconnectPolicy::new(Arc::clone(&sessions), Arc::clone(&hub));

        let transient: ErrorPredicate = Arc::new(|error: &MailError| error.is_socket_timeout());
        policy.on_transient_error(transient);
        match self.config.reconnect_interval() {
            Some(period) => policy.schedule_interval(period),
            None => debug!("Periodic reconnect disabled"),
        }

        sessions.prime();

        if let Some(handler) = self.on_new_mail {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                let listener = Listener::NewMail(handler);
                if let Err(e) = hub.subscribe(listener.clone()).await {
                    warn!("Could not subscribe configured new-mail handler yet ({}), will attach on connect", e);
                    hub.register(listener);
                }
            });
        }

        Ok(MailboxClient {
            sessions,
            hub,
            policy,
            parser: self.parser.unwrap_or_default(),
            transport,
        })
    }
}

/// Long-lived client for one mailbox.
///
/// The session is shared by all operations, replaced periodically and after
/// socket timeouts, and subscribers stay attached across replacements.
pub struct MailboxClient {
    sessions: Arc<SessionManager>,
    hub: Arc<EventHub>,
    policy: ReconnectPolicy,
    parser: MessageParser,
    transport: Arc<dyn MailTransport>,
}

impl MailboxClient {
    pub fn builder(config: EmailConfig) -> MailboxClientBuilder {
        MailboxClientBuilder {
            config,
            on_new_mail: None,
            connector: None,
            transport: None,
            parser: None,
        }
    }

    /// Shorthand for `MailboxClient::builder(config).build()`.
    pub fn new(config: EmailConfig) -> Result<Self, MailError> {
        Self::builder(config).build()
    }

    /// Account user the client logs in as.
    pub fn user(&self) -> &str {
        &self.sessions.config().user
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Searches the mailbox and parses every match.
    ///
    /// Results are ordered by date, oldest first; messages without a usable
    /// date come first. Attachment files in the results belong to the caller.
    pub async fn search(&self, criteria: &Criteria) -> Result<Vec<AppMessage>, MailError> {
        let session = self.sessions.get_session().await?;
        let raw_messages = session.search(criteria).await?;
        debug!("Search '{}' matched {} message(s)", criteria.to_query(), raw_messages.len());

        let results = join_all(raw_messages.iter().map(|raw| self.parser.parse(raw))).await;
        let mut messages = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(message) => messages.push(message),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        // Nobody receives the parsed messages, so their attachment files go too.
        if let Some(e) = failure {
            for message in &messages {
                discard(&message.attachments).await;
            }
            return Err(e);
        }

        messages.sort_by_key(|message| message.date);
        Ok(messages)
    }

    /// Adds labels to the messages. Requires the label extension.
    pub async fn add_labels<S, L>(&self, source: S, labels: L) -> Result<(), MailError>
    where
        S: Into<MessageSource>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        self.modify_labels(source.into(), labels, LabelOperation::Add).await
    }

    /// Replaces the labels of the messages. Requires the label extension.
    pub async fn set_labels<S, L>(&self, source: S, labels: L) -> Result<(), MailError>
    where
        S: Into<MessageSource>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        self.modify_labels(source.into(), labels, LabelOperation::Set).await
    }

    /// Removes labels from the messages. Requires the label extension.
    pub async fn delete_labels<S, L>(&self, source: S, labels: L) -> Result<(), MailError>
    where
        S: Into<MessageSource>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        self.modify_labels(source.into(), labels, LabelOperation::Remove).await
    }

    async fn modify_labels<L>(&self, source: MessageSource, labels: L, operation: LabelOperation) -> Result<(), MailError>
    where
        L: IntoIterator,
        L::Item: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let session = self.sessions.get_session().await?;
        let extension = session.labels().ok_or_else(|| {
            MailError::UnsupportedOperation("The server does not support message labels".to_string())
        })?;

        debug!("{:?} labels {:?} on {}", operation, labels, source.to_sequence_set());
        extension.store_labels(&source, operation, &labels).await
    }

    pub async fn send_mail(&self, options: SendMessageOptions) -> Result<(), MailError> {
        self.transport.send_mail(options).await
    }

    /// Subscribes to new-mail notifications. The handler immediately receives
    /// the current message count if the mailbox is not empty.
    pub async fn on_new_mail_received<F>(&self, handler: F) -> Result<Unsubscriber, MailError>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.hub.subscribe(Listener::new_mail(handler)).await
    }

    pub async fn on_error<F>(&self, handler: F) -> Result<Unsubscriber, MailError>
    where
        F: Fn(&MailError) + Send + Sync + 'static,
    {
        self.hub.subscribe(Listener::error(handler)).await
    }

    /// Replaces the session now. Subscribers are carried over.
    pub async fn reconnect(&self, safely: bool) -> Result<(), MailError> {
        self.policy.reconnect(safely).await.map(|_| ())
    }

    /// Stops background reconnects, drops every subscription and closes the session.
    ///
    /// The mailbox is closed first. With `safely`, the session is then logged
    /// out after queued commands finish. Otherwise CLOSE gets
    /// [`FORCED_CLOSE_GRACE`](crate::session_manager::FORCED_CLOSE_GRACE), the
    /// transport is torn down and in-flight operations fail with
    /// [`MailError::Connection`].
    /// A later operation connects again, without background reconnects.
    pub async fn disconnect(&self, safely: bool) {
        info!("Disconnecting mailbox client for '{}' (safely: {})", self.user(), safely);
        self.policy.cancel();
        self.hub.clear();
        self.sessions.disconnect(safely).await;
    }
}
