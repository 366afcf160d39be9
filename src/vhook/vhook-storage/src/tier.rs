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
use crate::{local::LocalStore, object_store::ObjectStore};
use vhook_common::{
    Attachment, AttachmentInfo, SkippedAttachment, StorageSummary, StoredAttachment,
};

const LOCAL_NOTE: &str = "Temporarily stored locally, will be uploaded to S3 when available";
const SKIP_REASON: &str = "File size exceeds maximum allowed";

/// Outcome of storing every attachment of one message.
#[derive(Debug, Default)]
pub struct StoredSet {
    /// Projections of the stored (non-skipped) attachments.
    pub attachment_info: Vec<AttachmentInfo>,
    /// The refused ones.
    pub skipped: Vec<SkippedAttachment>,
    /// Accounting, `None` when the message carried no attachment.
    pub summary: Option<StorageSummary>,
}

/// The storage tier: primary object store, local fallback, reconciliation.
pub struct AttachmentStorage {
    object_store: Option<std::sync::Arc<dyn ObjectStore>>,
    local: LocalStore,
    max_file_size: usize,
    retry_interval: std::time::Duration,
    max_retries: u32,
    /// Upload attempts per staged payload; entries at the cap are out of
    /// the retry set and wait for the retention sweep.
    retry_attempts: std::sync::Mutex<std::collections::HashMap<std::path::PathBuf, u32>>,
    reconciler_running: std::sync::atomic::AtomicBool,
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock set before the unix epoch")
        .as_millis()
}

impl AttachmentStorage {
    ///
    #[must_use]
    pub fn new(
        object_store: Option<std::sync::Arc<dyn ObjectStore>>,
        local: LocalStore,
        max_file_size: usize,
        retry_interval: std::time::Duration,
        max_retries: u32,
    ) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            object_store,
            local,
            max_file_size,
            retry_interval,
            max_retries,
            retry_attempts: std::sync::Mutex::new(std::collections::HashMap::new()),
            reconciler_running: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// The local staging area, for the retention sweep wiring.
    #[must_use]
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Store one attachment: size policy first, then the primary store,
    /// then the local fallback. Never fails the message, the worst case is
    /// a [`StoredAttachment::Failed`] entry.
    pub async fn store(&self, attachment: &Attachment) -> StoredAttachment {
        if attachment.size() > self.max_file_size {
            tracing::info!(
                filename = %attachment.filename,
                size = attachment.size(),
                max = self.max_file_size,
                "Attachment over the size cap, skipping."
            );
            return StoredAttachment::Skipped {
                reason: SKIP_REASON.to_string(),
            };
        }

        if let Some(object_store) = &self.object_store {
            let key = format!("{}-{}", unix_millis(), attachment.filename);
            match object_store
                .put(&key, &attachment.content_type, attachment.content.clone())
                .await
            {
                Ok(url) => {
                    tracing::debug!(filename = %attachment.filename, %url, "Attachment uploaded.");
                    return StoredAttachment::Object { url };
                }
                Err(error) => {
                    tracing::warn!(
                        %error,
                        filename = %attachment.filename,
                        "Primary store failure, falling back to local storage."
                    );
                }
            }
        }

        match self.local.save(attachment) {
            Ok(saved) => StoredAttachment::Local {
                path: saved.path,
                attachment_id: saved.file_id,
                note: LOCAL_NOTE.to_string(),
            },
            Err(error) => {
                tracing::error!(%error, filename = %attachment.filename, "Attachment lost.");
                StoredAttachment::Failed {
                    error: error.to_string(),
                }
            }
        }
    }

    /// Store every attachment of one message independently; one failure
    /// never poisons the others. Kicks the reconciler when something
    /// landed on the local disk.
    pub async fn store_all(self: &std::sync::Arc<Self>, attachments: &[Attachment]) -> StoredSet {
        if attachments.is_empty() {
            return StoredSet::default();
        }

        let mut set = StoredSet::default();
        let mut summary = StorageSummary {
            total: attachments.len(),
            ..StorageSummary::default()
        };

        for attachment in attachments {
            let stored = self.store(attachment).await;

            match &stored {
                StoredAttachment::Object { .. } => summary.uploaded_to_s3 += 1,
                StoredAttachment::Local { .. } => summary.stored_locally += 1,
                StoredAttachment::Skipped { reason } => {
                    summary.skipped += 1;
                    set.skipped.push(SkippedAttachment {
                        filename: attachment.filename.clone(),
                        size: attachment.size(),
                        reason: reason.clone(),
                    });
                }
                StoredAttachment::Failed { .. } => {}
            }

            if let Some(info) = stored.info(attachment) {
                set.attachment_info.push(info);
            }
        }

        if summary.stored_locally > 0 {
            self.start_reconciler();
        }

        set.summary = Some(summary);
        set
    }

    /// Spawn the reconciliation loop unless it is already running. Called
    /// at startup when leftovers exist and after every fallback write.
    pub fn start_reconciler(self: &std::sync::Arc<Self>) {
        if self.object_store.is_none() {
            return;
        }
        if self
            .reconciler_running
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }

        tracing::info!("Starting the attachment reconciliation loop.");
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.retry_interval).await;

                match this.reconcile_once().await {
                    Ok(0) => break,
                    Ok(pending) => tracing::debug!(pending, "Reconciliation pass done."),
                    Err(error) => tracing::warn!(%error, "Reconciliation pass failed."),
                }
            }

            tracing::info!("Attachment reconciliation loop drained, stopping.");
            this.reconciler_running
                .store(false, std::sync::atomic::Ordering::SeqCst);
        });
    }

    /// One reconciliation pass: re-read each staged payload from disk,
    /// attempt the upload, unlink on success. Returns how many payloads are
    /// still pending (capped ones excluded).
    ///
    /// # Errors
    ///
    /// * the staging directory cannot be listed
    pub async fn reconcile_once(&self) -> anyhow::Result<usize> {
        let Some(object_store) = &self.object_store else {
            return Ok(0);
        };

        let mut pending = 0;

        for path in self.local.retry_queue()? {
            let attempts = *self
                .retry_attempts
                .lock()
                .expect("retry map poisoned")
                .get(&path)
                .unwrap_or(&0);
            if attempts >= self.max_retries {
                continue;
            }

            // content is never held between passes, always re-read
            let (content, meta) = match self.local.read(&path) {
                Ok(read) => read,
                Err(error) => {
                    tracing::warn!(%error, path = %path.display(), "Unreadable staged payload.");
                    continue;
                }
            };

            let key = format!("{}-{}", unix_millis(), meta.original_name);
            match object_store.put(&key, &meta.content_type, content).await {
                Ok(url) => {
                    tracing::info!(%url, path = %path.display(), "Staged attachment drained.");
                    if let Err(error) = self.local.remove(&path) {
                        tracing::warn!(%error, path = %path.display(), "Cannot unlink drained payload.");
                    }
                    self.retry_attempts
                        .lock()
                        .expect("retry map poisoned")
                        .remove(&path);
                }
                Err(error) => {
                    let attempts = attempts + 1;
                    if attempts >= self.max_retries {
                        tracing::warn!(
                            %error,
                            path = %path.display(),
                            attempts,
                            "Upload attempts exhausted, leaving the payload to retention."
                        );
                    } else {
                        tracing::warn!(%error, path = %path.display(), attempts, "Upload retry failed.");
                        pending += 1;
                    }
                    self.retry_attempts
                        .lock()
                        .expect("retry map poisoned")
                        .insert(path, attempts);
                }
            }
        }

        Ok(pending)
    }
}
