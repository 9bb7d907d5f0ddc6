// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use tokio::io::AsyncWriteExt;

use crate::error::MailError;
use crate::imap::types::MessageAttachment;
use crate::parser::stream::AttachmentStream;

const TEMP_FILE_PREFIX: &str = "attachment-";

/// Copies attachment streams into temporary files.
///
/// Files are kept after extraction. The returned [`MessageAttachment`] is
/// the only reference to them and the caller is responsible for removal.
#[derive(Debug, Clone, Default)]
pub struct AttachmentExtractor {
    dir: Option<PathBuf>,
}

impl AttachmentExtractor {
    /// Extracts into the system temporary directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts into `dir` instead of the system temporary directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(dir.into()) }
    }

    pub async fn extract(&self, stream: AttachmentStream) -> Result<MessageAttachment, MailError> {
        let AttachmentStream { meta, mut content, summary } = stream;

        let (file, path) = self.create_file()?;
        let mut file = tokio::fs::File::from_std(file);
        debug!("Extracting {} attachment to {}", meta.content_type, path.display());

        let copied = async {
            while let Some(chunk) = content.recv().await {
                let chunk = chunk.map_err(|e| MailError::Parse(format!("Attachment stream failed: {}", e)))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| MailError::Parse(format!("Failed to write attachment data: {}", e)))?;
            }
            file.flush()
                .await
                .map_err(|e| MailError::Parse(format!("Failed to flush attachment data: {}", e)))?;
            summary
                .await
                .map_err(|_| MailError::Parse("Attachment stream ended without a summary".to_string()))
        }
        .await;

        let summary = match copied {
            Ok(summary) => summary,
            Err(e) => {
                error!("Attachment extraction failed: {}", e);
                drop(file);
                remove_file(&path).await;
                return Err(e);
            }
        };

        Ok(MessageAttachment {
            path,
            content_type: meta.content_type,
            content_disposition: meta.content_disposition,
            filename: meta.filename,
            headers: meta.headers,
            checksum: summary.checksum,
            size: summary.size,
            content_id: meta.content_id,
            related: meta.related,
        })
    }

    fn create_file(&self) -> Result<(std::fs::File, PathBuf), MailError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_FILE_PREFIX);
        let temp = match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| MailError::Storage(format!("Failed to create temporary file: {}", e)))?;

        Ok(temp.keep()?)
    }
}

/// Deletes the files of attachments that will never reach a caller.
pub async fn discard(attachments: &[MessageAttachment]) {
    for attachment in attachments {
        remove_file(&attachment.path).await;
    }
}

async fn remove_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove attachment file {}: {}", path.display(), e);
    }
}
