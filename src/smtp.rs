// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;
use crate::error::MailError;

const SMTPS_PORT: u16 = 465;
const SUBMISSION_PORT: u16 = 587;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageOptions {
    /// One address or a comma-separated list.
    pub to: String,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<OutgoingAttachment>,
}

/// Outgoing mail delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_mail(&self, options: SendMessageOptions) -> Result<(), MailError>;
}

/// SMTP endpoint of the account a mailbox session belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when true, STARTTLS otherwise.
    pub implicit_tls: bool,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("implicit_tls", &self.implicit_tls)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SmtpSettings {
    /// Same provider and credentials as the mailbox: `imap.example.com` becomes `smtp.example.com`.
    pub fn derive(config: &ConnectionConfig) -> Self {
        let host = match config.host.strip_prefix("imap.") {
            Some(domain) => format!("smtp.{}", domain),
            None => config.host.clone(),
        };
        let (port, implicit_tls) = if config.tls {
            (SMTPS_PORT, true)
        } else {
            (SUBMISSION_PORT, false)
        };

        Self {
            host,
            port,
            implicit_tls,
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }
}

/// [`MailTransport`] over SMTP, sending as the account user.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    sender: String,
}

impl SmtpTransport {
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let credentials = Credentials::new(settings.user.clone(), settings.password.clone());
        let builder = if settings.implicit_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
        };

        debug!("SMTP transport for {}:{} (implicit TLS: {})", settings.host, settings.port, settings.implicit_tls);
        Ok(Self {
            mailer: builder.port(settings.port).credentials(credentials).build(),
            sender: settings.user.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send_mail(&self, options: SendMessageOptions) -> Result<(), MailError> {
        let recipients = options.to.clone();
        let email = build_message(&self.sender, options)?;
        self.mailer.send(email).await?;
        info!("Mail sent to {}", recipients);
        Ok(())
    }
}

/// Builds the MIME message: plain and/or HTML alternatives, wrapped in
/// `multipart/mixed` when there are attachments.
pub fn build_message(sender: &str, options: SendMessageOptions) -> Result<Message, MailError> {
    let mut builder = Message::builder().from(sender.parse::<Mailbox>()?).subject(options.subject);

    let mut recipients = 0;
    for address in options.to.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        builder = builder.to(address.parse::<Mailbox>()?);
        recipients += 1;
    }
    if recipients == 0 {
        return Err(MailError::Transport("No recipient address".to_string()));
    }

    let body = match (options.text, options.html) {
        (Some(text), Some(html)) => Body::Multi(
            MultiPart::alternative()
                .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(text))
                .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(html)),
        ),
        (None, Some(html)) => Body::Single(SinglePart::builder().header(ContentType::TEXT_HTML).body(html)),
        (text, None) => Body::Single(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(text.unwrap_or_default()),
        ),
    };

    if options.attachments.is_empty() {
        return Ok(match body {
            Body::Single(part) => builder.singlepart(part)?,
            Body::Multi(parts) => builder.multipart(parts)?,
        });
    }

    let mut mixed = match body {
        Body::Single(part) => MultiPart::mixed().singlepart(part),
        Body::Multi(parts) => MultiPart::mixed().multipart(parts),
    };
    for attachment in options.attachments {
        let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
            MailError::Transport(format!("Invalid content type '{}': {}", attachment.content_type, e))
        })?;
        mixed = mixed.singlepart(Attachment::new(attachment.filename).body(attachment.content, content_type));
    }
    Ok(builder.multipart(mixed)?)
}

enum Body {
    Single(SinglePart),
    Multi(MultiPart),
}
