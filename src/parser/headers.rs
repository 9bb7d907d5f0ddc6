// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use mail_parser::parsers::MessageStream;
use mail_parser::HeaderValue;

/// Turns a raw header field body into a display value: folded lines are
/// joined and RFC 2047 encoded words are decoded in their declared charset.
///
/// Every field goes through the unstructured-text reader, so address and
/// extension headers keep their full text with only encoded words replaced.
pub fn header_value(raw: &[u8]) -> String {
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |last| last + 1);
    if end == 0 {
        return String::new();
    }

    // The reader stops at a line break not followed by whitespace.
    let mut field = Vec::with_capacity(end + 2);
    field.extend_from_slice(&raw[..end]);
    field.extend_from_slice(b"\r\n");

    match MessageStream::new(&field).parse_unstructured() {
        HeaderValue::Text(text) => text.into_owned(),
        HeaderValue::TextList(list) => list.join(" "),
        _ => String::new(),
    }
}

/// Decode MIME encoded-word headers (RFC 2047) in a single unfolded value.
pub fn decode_mime_header(input: &str) -> String {
    header_value(input.as_bytes())
}
