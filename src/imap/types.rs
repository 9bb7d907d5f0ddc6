// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One search term: either a bare keyword (`UNSEEN`) or a keyword with arguments
/// (`["SINCE", "1-Jan-2024"]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Criterion {
    Term(String),
    Compound(Vec<String>),
}

impl From<&str> for Criterion {
    fn from(term: &str) -> Self {
        Criterion::Term(term.to_string())
    }
}

impl From<String> for Criterion {
    fn from(term: String) -> Self {
        Criterion::Term(term)
    }
}

impl<const N: usize> From<[&str; N]> for Criterion {
    fn from(parts: [&str; N]) -> Self {
        Criterion::Compound(parts.iter().map(|p| p.to_string()).collect())
    }
}

/// Ordered search criteria handed to the protocol layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Criteria(pub Vec<Criterion>);

impl Criteria {
    pub fn all() -> Self {
        Criteria(vec![Criterion::Term("ALL".to_string())])
    }

    pub fn new<I, C>(terms: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Criterion>,
    {
        Criteria(terms.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the criteria as an IMAP `SEARCH` key list. Empty criteria match everything.
    pub fn to_query(&self) -> String {
        if self.0.is_empty() {
            return "ALL".to_string();
        }

        self.0
            .iter()
            .filter_map(|criterion| match criterion {
                Criterion::Term(term) => Some(term.trim().to_ascii_uppercase()),
                Criterion::Compound(parts) => {
                    let (keyword, args) = parts.split_first()?;
                    let mut rendered = keyword.trim().to_ascii_uppercase();
                    for arg in args {
                        rendered.push(' ');
                        rendered.push_str(&quote_argument(arg));
                    }
                    Some(rendered)
                }
            })
            .filter(|term| !term.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Sequence sets and numbers go out bare; anything else becomes a quoted string.
fn quote_argument(arg: &str) -> String {
    let bare = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ':' | ',' | '*'));
    if bare {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Messages targeted by a label mutation: one UID or range, or several of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageSource {
    Single(String),
    Many(Vec<String>),
}

impl MessageSource {
    /// UID sequence set, e.g. `2504:2507,2510`.
    pub fn to_sequence_set(&self) -> String {
        match self {
            MessageSource::Single(id) => id.trim().to_string(),
            MessageSource::Many(ids) => ids
                .iter()
                .map(|id| id.trim())
                .filter(|id| !id.is_empty())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for MessageSource {
    fn from(id: &str) -> Self {
        MessageSource::Single(id.to_string())
    }
}

impl From<String> for MessageSource {
    fn from(id: String) -> Self {
        MessageSource::Single(id)
    }
}

impl From<u32> for MessageSource {
    fn from(uid: u32) -> Self {
        MessageSource::Single(uid.to_string())
    }
}

impl From<Vec<String>> for MessageSource {
    fn from(ids: Vec<String>) -> Self {
        MessageSource::Many(ids)
    }
}

impl From<&[&str]> for MessageSource {
    fn from(ids: &[&str]) -> Self {
        MessageSource::Many(ids.iter().map(|id| id.to_string()).collect())
    }
}

impl From<&[u32]> for MessageSource {
    fn from(uids: &[u32]) -> Self {
        MessageSource::Many(uids.iter().map(|uid| uid.to_string()).collect())
    }
}

/// How a label store command treats the existing labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOperation {
    Add,
    Set,
    Remove,
}

impl LabelOperation {
    pub fn store_item(&self) -> &'static str {
        match self {
            LabelOperation::Add => "+X-GM-LABELS",
            LabelOperation::Set => "X-GM-LABELS",
            LabelOperation::Remove => "-X-GM-LABELS",
        }
    }
}

/// One fetched body section of a raw message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPart {
    /// Section specifier; empty for the whole message.
    pub which: String,
    pub body: Vec<u8>,
}

/// Unparsed protocol-level message: attributes plus body parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub uid: u32,
    pub size: u32,
    pub parts: Vec<RawPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub uid: u32,
    pub size: u32,
}

/// A parsed mailbox message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMessage {
    pub info: MessageInfo,
    /// Lower-cased header names; a repeated header keeps its last value.
    pub headers: HashMap<String, String>,
    /// Parsed value of the `date` header.
    pub date: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub attachments: Vec<MessageAttachment>,
}

/// Metadata and on-disk location of one attachment.
///
/// The file at `path` is created by the parser and is NOT removed by this
/// crate. Ownership passes to the caller, who must delete it when done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub path: PathBuf,
    pub content_type: String,
    pub content_disposition: Option<String>,
    pub filename: Option<String>,
    pub headers: HashMap<String, String>,
    /// Hex-encoded SHA-256 of the attachment bytes.
    pub checksum: String,
    pub size: u64,
    pub content_id: Option<String>,
    /// Part of a `multipart/related` body (e.g. an inline image referenced by cid).
    pub related: bool,
}
