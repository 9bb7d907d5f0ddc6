// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::error::MailError;
use crate::imap::types::{AppMessage, MessageInfo, RawMessage};
use crate::parser::attachment::{discard, AttachmentExtractor};
use crate::parser::stream::{MailParserStream, MimeEvent, StreamingParser};

/// Creates one streaming parser per message.
pub type ParserFactory = Arc<dyn Fn() -> Box<dyn StreamingParser> + Send + Sync>;

/// Turns raw protocol messages into [`AppMessage`]s.
///
/// Each call to [`MessageParser::parse`] uses its own parser instance, so
/// messages from one search can be parsed concurrently.
#[derive(Clone)]
pub struct MessageParser {
    factory: ParserFactory,
    extractor: AttachmentExtractor,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(AttachmentExtractor::new())
    }
}

impl fmt::Debug for MessageParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageParser").field("extractor", &self.extractor).finish()
    }
}

impl MessageParser {
    pub fn new(extractor: AttachmentExtractor) -> Self {
        Self {
            factory: Arc::new(|| Box::new(MailParserStream::new())),
            extractor,
        }
    }

    /// Uses `factory` instead of the `mail-parser` backed stream.
    pub fn with_factory(factory: ParserFactory, extractor: AttachmentExtractor) -> Self {
        Self { factory, extractor }
    }

    /// Parses one message. On failure, attachment files already extracted
    /// for it are removed.
    pub async fn parse(&self, raw: &RawMessage) -> Result<AppMessage, MailError> {
        let mut parser = (self.factory)();
        for part in &raw.parts {
            parser.write(&part.body);
        }
        let mut events = parser.end();

        let mut headers = HashMap::new();
        let mut date = None;
        let mut text = None;
        let mut attachments = Vec::new();

        while let Some(event) = events.recv().await {
            match event {
                MimeEvent::Headers(block) => {
                    // Repeated names keep the last value.
                    headers.extend(block.fields);
                    if block.date.is_some() {
                        date = block.date;
                    }
                }
                MimeEvent::Text(part) => {
                    text = Some(part.best());
                }
                MimeEvent::Attachment(stream) => match self.extractor.extract(stream).await {
                    Ok(attachment) => attachments.push(attachment),
                    Err(e) => {
                        discard(&attachments).await;
                        return Err(e);
                    }
                },
                MimeEvent::End => {
                    debug!("Parsed message {} ({} attachment(s))", raw.uid, attachments.len());
                    return Ok(AppMessage {
                        info: MessageInfo { uid: raw.uid, size: raw.size },
                        headers,
                        date,
                        text,
                        attachments,
                    });
                }
                MimeEvent::Error(reason) => {
                    warn!("Failed to parse message {}: {}", raw.uid, reason);
                    discard(&attachments).await;
                    return Err(MailError::Parse(reason));
                }
            }
        }

        discard(&attachments).await;
        Err(MailError::Parse(format!("Parser for message {} stopped before the end of input", raw.uid)))
    }
}
