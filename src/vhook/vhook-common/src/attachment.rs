/*
 * vHook SMTP to webhook relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::AttachmentInfo;

/// A MIME part carrying a payload, as decoded from the incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Original filename.
    pub filename: String,
    /// Declared MIME type.
    pub content_type: String,
    /// Decoded payload.
    pub content: Vec<u8>,
}

impl Attachment {
    /// Payload length in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Outcome of the storage tier for one attachment.
///
/// Value-typed with an explicit discriminator, no back-pointers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredAttachment {
    /// Uploaded to the primary object store.
    Object {
        /// Durable URL of the object.
        url: String,
    },
    /// Staged on the local disk, queued for later drain.
    Local {
        /// Path of the data file.
        path: std::path::PathBuf,
        /// Identifier recorded in the sibling meta file.
        #[serde(rename = "attachmentId")]
        attachment_id: String,
        /// Operator-facing note.
        note: String,
    },
    /// Refused by the size policy, no backend touched.
    Skipped {
        /// Why it was refused.
        reason: String,
    },
    /// Both backends failed; the attachment is lost.
    Failed {
        /// The terminal error.
        error: String,
    },
}

impl StoredAttachment {
    /// Projection exposed to the webhook consumer, `None` for skipped and
    /// failed attachments.
    #[must_use]
    pub fn info(&self, attachment: &Attachment) -> Option<AttachmentInfo> {
        match self {
            Self::Object { url } => Some(AttachmentInfo {
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                size: attachment.size(),
                location: Some(url.clone()),
                storage_type: "s3".to_string(),
                note: None,
                attachment_id: None,
            }),
            Self::Local {
                attachment_id,
                note,
                ..
            } => Some(AttachmentInfo {
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                size: attachment.size(),
                location: None,
                storage_type: "local".to_string(),
                note: Some(note.clone()),
                attachment_id: Some(attachment_id.clone()),
            }),
            Self::Skipped { .. } | Self::Failed { .. } => None,
        }
    }
}
