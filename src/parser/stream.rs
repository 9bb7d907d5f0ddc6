// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Event-based MIME parsing.
//!
//! A [`StreamingParser`] accepts raw message bytes and, once ended, reports the
//! message as a sequence of [`MimeEvent`]s. Attachment bodies are not buffered
//! in the event itself: each arrives as its own chunked stream whose final
//! size and checksum are only known after the last chunk.

use std::collections::HashMap;
use std::io;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use mail_parser::{Message, MimeHeaders};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};

use crate::parser::headers::header_value;

/// Size of the chunks an attachment body is streamed in.
pub const ATTACHMENT_CHUNK_SIZE: usize = 64 * 1024;

const ATTACHMENT_CHANNEL_CAPACITY: usize = 8;

/// Top-level headers of a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderBlock {
    /// Lower-cased names with decoded values, in message order. Names may repeat.
    pub fields: Vec<(String, String)>,
    pub date: Option<DateTime<Utc>>,
}

/// The readable body of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextPart {
    /// The message's own `text/html` body, if it has one.
    pub html: Option<String>,
    /// The body rendered as HTML, converted from plain text when needed.
    pub text_as_html: Option<String>,
}

impl TextPart {
    /// First non-empty rendering, or an empty string.
    pub fn best(&self) -> String {
        [&self.html, &self.text_as_html]
            .into_iter()
            .flatten()
            .find(|body| !body.is_empty())
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub content_type: String,
    pub content_disposition: Option<String>,
    pub filename: Option<String>,
    pub headers: HashMap<String, String>,
    pub content_id: Option<String>,
    pub related: bool,
}

/// Reported once an attachment stream has delivered its last chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub size: u64,
    /// Hex-encoded SHA-256 of the streamed bytes.
    pub checksum: String,
}

#[derive(Debug)]
pub struct AttachmentStream {
    pub meta: AttachmentMeta,
    pub content: mpsc::Receiver<io::Result<Vec<u8>>>,
    pub summary: oneshot::Receiver<StreamSummary>,
}

impl AttachmentStream {
    /// Creates a stream together with the sending half that feeds it.
    pub fn channel(meta: AttachmentMeta) -> (AttachmentSink, AttachmentStream) {
        let (content_tx, content) = mpsc::channel(ATTACHMENT_CHANNEL_CAPACITY);
        let (summary_tx, summary) = oneshot::channel();
        let sink = AttachmentSink {
            content: content_tx,
            summary: summary_tx,
            hasher: Sha256::new(),
            size: 0,
        };
        (sink, AttachmentStream { meta, content, summary })
    }
}

/// Producer side of an [`AttachmentStream`].
pub struct AttachmentSink {
    content: mpsc::Sender<io::Result<Vec<u8>>>,
    summary: oneshot::Sender<StreamSummary>,
    hasher: Sha256,
    size: u64,
}

impl AttachmentSink {
    /// Returns `false` once the consumer has gone away.
    pub async fn send(&mut self, chunk: Vec<u8>) -> bool {
        self.hasher.update(&chunk);
        self.size += chunk.len() as u64;
        self.content.send(Ok(chunk)).await.is_ok()
    }

    pub async fn fail(self, error: io::Error) {
        let _ = self.content.send(Err(error)).await;
    }

    /// Closes the content channel, then publishes the summary.
    pub fn finish(self) {
        let AttachmentSink { content, summary, hasher, size } = self;
        drop(content);
        let _ = summary.send(StreamSummary {
            size,
            checksum: hex::encode(hasher.finalize()),
        });
    }
}

#[derive(Debug)]
pub enum MimeEvent {
    Headers(HeaderBlock),
    Text(TextPart),
    Attachment(AttachmentStream),
    /// Terminal: the message was fully reported.
    End,
    /// Terminal: the input could not be parsed.
    Error(String),
}

/// A push-style MIME parser. Bytes are written in order, then `end` yields the events.
pub trait StreamingParser: Send {
    fn write(&mut self, chunk: &[u8]);

    fn end(self: Box<Self>) -> mpsc::UnboundedReceiver<MimeEvent>;
}

/// [`StreamingParser`] backed by `mail-parser`.
#[derive(Debug, Default)]
pub struct MailParserStream {
    buffer: Vec<u8>,
}

impl MailParserStream {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamingParser for MailParserStream {
    fn write(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn end(self: Box<Self>) -> mpsc::UnboundedReceiver<MimeEvent> {
        let (events, rx) = mpsc::unbounded_channel();
        let raw = self.buffer;

        tokio::spawn(async move {
            let parsed = match tokio::task::spawn_blocking(move || ParsedMail::parse(&raw)).await {
                Ok(Some(parsed)) => parsed,
                Ok(None) => {
                    let _ = events.send(MimeEvent::Error("Input is not a MIME message".to_string()));
                    return;
                }
                Err(e) => {
                    let _ = events.send(MimeEvent::Error(format!("MIME parser task failed: {}", e)));
                    return;
                }
            };
            parsed.emit(&events).await;
        });

        rx
    }
}

struct ParsedAttachment {
    meta: AttachmentMeta,
    contents: Vec<u8>,
}

/// Owned copy of everything the events need, so nothing borrows the raw buffer
/// across await points.
struct ParsedMail {
    headers: HeaderBlock,
    text: TextPart,
    attachments: Vec<ParsedAttachment>,
}

impl ParsedMail {
    fn parse(raw: &[u8]) -> Option<Self> {
        let message = Message::parse(raw)?;

        let fields = message
            .headers()
            .iter()
            .filter_map(|h| {
                let value = raw.get(h.offset_start as usize..h.offset_end as usize)?;
                Some((h.name.as_str().to_ascii_lowercase(), header_value(value)))
            })
            .collect();
        let date = message
            .date()
            .and_then(|date| Utc.timestamp_opt(date.to_timestamp(), 0).single());

        let html = message
            .html_part(0)
            .filter(|part| {
                part.content_type()
                    .is_some_and(|ct| ct.ctype().eq_ignore_ascii_case("text") && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("html")))
            })
            .and_then(|part| part.text_contents())
            .map(str::to_string);
        let text_as_html = message.body_html(0).map(|body| body.into_owned());

        let attachments = message
            .attachments()
            .map(|part| {
                let content_type = part
                    .content_type()
                    .map(|ct| match ct.subtype() {
                        Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                        None => ct.ctype().to_string(),
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string())
                    .to_ascii_lowercase();
                let content_disposition = part.content_disposition().map(|cd| cd.ctype().to_ascii_lowercase());
                let content_id = part
                    .content_id()
                    .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string());
                let related = content_id.is_some() && content_disposition.as_deref() != Some("attachment");
                let headers = part
                    .headers
                    .iter()
                    .filter_map(|h| {
                        let value = raw.get(h.offset_start as usize..h.offset_end as usize)?;
                        Some((h.name.as_str().to_ascii_lowercase(), header_value(value)))
                    })
                    .collect();

                ParsedAttachment {
                    meta: AttachmentMeta {
                        content_type,
                        content_disposition,
                        filename: part.attachment_name().map(str::to_string),
                        headers,
                        content_id,
                        related,
                    },
                    contents: part.contents().to_vec(),
                }
            })
            .collect();

        Some(ParsedMail {
            headers: HeaderBlock { fields, date },
            text: TextPart { html, text_as_html },
            attachments,
        })
    }

    async fn emit(self, events: &mpsc::UnboundedSender<MimeEvent>) {
        if events.send(MimeEvent::Headers(self.headers)).is_err() {
            return;
        }
        if events.send(MimeEvent::Text(self.text)).is_err() {
            return;
        }

        for attachment in self.attachments {
            let (mut sink, stream) = AttachmentStream::channel(attachment.meta);
            if events.send(MimeEvent::Attachment(stream)).is_err() {
                return;
            }

            let mut delivered = true;
            for chunk in attachment.contents.chunks(ATTACHMENT_CHUNK_SIZE) {
                if !sink.send(chunk.to_vec()).await {
                    delivered = false;
                    break;
                }
            }
            if !delivered {
                warn!("Attachment consumer went away before the stream ended");
                return;
            }
            sink.finish();
        }

        debug!("MIME parse complete");
        let _ = events.send(MimeEvent::End);
    }
}
