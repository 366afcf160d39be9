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
use aes_gcm::aead::{Aead, KeyInit};
use std::os::unix::fs::OpenOptionsExt;
use vhook_common::Attachment;

const GCM_TAG_LEN: usize = 16;
const GCM_IV_LEN: usize = 12;

/// Last-resort failure: the attachment cannot be stored anywhere.
#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    /// Disk trouble.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The sibling meta file cannot be encoded or decoded.
    #[error("invalid meta file: {0}")]
    Meta(String),
    /// Encryption or decryption failed (a tag mismatch means the payload
    /// was tampered with or the key changed).
    #[error("encryption failure: {0}")]
    Crypto(String),
}

/// Encryption descriptor recorded next to an encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMeta {
    /// Always `aes-256-gcm`.
    pub algorithm: String,
    /// Hex-encoded 12-byte IV.
    pub iv: String,
    /// Hex-encoded 16-byte authentication tag.
    pub auth_tag: String,
    /// Discriminator kept for consumers of the raw meta files.
    pub encrypted: bool,
}

/// The `.meta` JSON written next to every staged payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMeta {
    /// Filename from the MIME part.
    pub original_name: String,
    /// Declared MIME type.
    pub content_type: String,
    /// Plaintext size in bytes.
    pub size: usize,
    /// RFC3339 stamp of the save.
    pub saved_at: String,
    /// Identifier of this staged payload.
    pub file_id: String,
    /// Present when the payload is encrypted at rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionMeta>,
}

/// A payload staged on disk, data file plus sibling meta.
#[derive(Debug, Clone)]
pub struct SavedLocal {
    /// Path of the data file.
    pub path: std::path::PathBuf,
    /// Identifier recorded in the meta.
    pub file_id: String,
}

/// The on-disk staging area of the fallback tier.
pub struct LocalStore {
    dirpath: std::path::PathBuf,
    encryption_key: Option<[u8; 32]>,
    retention: std::time::Duration,
}

fn meta_path(data_path: &std::path::Path) -> std::path::PathBuf {
    let mut name = data_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".meta");
    data_path.with_file_name(name)
}

/// Keep only the final component of a client-supplied filename.
fn sanitize_filename(name: &str) -> String {
    let name = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim_matches('.');

    if name.is_empty() {
        "attachment".to_string()
    } else {
        name.to_string()
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .expect("rfc3339 formatting of the current time cannot fail")
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock set before the unix epoch")
        .as_millis()
}

fn write_mode_0600(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    std::io::Write::write_all(&mut file, bytes)
}

impl LocalStore {
    /// Open (and create if needed, mode 0700) the staging directory.
    ///
    /// # Errors
    ///
    /// * the directory cannot be created
    pub fn init(
        dirpath: impl Into<std::path::PathBuf>,
        encryption_key: Option<[u8; 32]>,
        retention_hours: u64,
    ) -> std::io::Result<Self> {
        let dirpath = dirpath.into();

        if !dirpath.exists() {
            let mut builder = std::fs::DirBuilder::new();
            builder.recursive(true);
            std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
            builder.create(&dirpath)?;
        }

        Ok(Self {
            dirpath,
            encryption_key,
            retention: std::time::Duration::from_secs(retention_hours * 3600),
        })
    }

    /// Stage one attachment, returning the data path and its id.
    ///
    /// # Errors
    ///
    /// * the data or meta file cannot be written
    /// * encryption failed
    pub fn save(&self, attachment: &Attachment) -> Result<SavedLocal, LocalStoreError> {
        let file_id = format!("{}-{:016x}", unix_millis(), rand::random::<u64>());
        let file_name = format!(
            "{file_id}-{}",
            sanitize_filename(&attachment.filename)
        );
        let data_path = self.dirpath.join(&file_name);

        let (payload, encryption) = match &self.encryption_key {
            Some(key) => {
                let (ciphertext, meta) = encrypt(key, &attachment.content)?;
                (ciphertext, Some(meta))
            }
            None => (attachment.content.clone(), None),
        };

        write_mode_0600(&data_path, &payload)?;

        let meta = LocalMeta {
            original_name: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
            size: attachment.size(),
            saved_at: now_rfc3339(),
            file_id: file_id.clone(),
            encryption,
        };
        let meta_bytes =
            serde_json::to_vec(&meta).map_err(|e| LocalStoreError::Meta(e.to_string()))?;

        if let Err(error) = write_mode_0600(&meta_path(&data_path), &meta_bytes) {
            // a data file without meta would never drain, drop it
            let _ = std::fs::remove_file(&data_path);
            return Err(error.into());
        }

        tracing::info!(path = %data_path.display(), "Attachment staged locally.");

        Ok(SavedLocal {
            path: data_path,
            file_id,
        })
    }

    /// Read one staged payload back, verifying and removing the encryption
    /// layer when there is one.
    ///
    /// # Errors
    ///
    /// * the data or meta file cannot be read
    /// * the authentication tag does not verify
    pub fn read(
        &self,
        data_path: &std::path::Path,
    ) -> Result<(Vec<u8>, LocalMeta), LocalStoreError> {
        let meta: LocalMeta =
            serde_json::from_slice(&std::fs::read(meta_path(data_path))?)
                .map_err(|e| LocalStoreError::Meta(e.to_string()))?;

        let payload = std::fs::read(data_path)?;

        let content = match &meta.encryption {
            Some(encryption) => {
                let key = self.encryption_key.ok_or_else(|| {
                    LocalStoreError::Crypto("payload is encrypted but no key is configured".into())
                })?;
                decrypt(&key, encryption, &payload)?
            }
            None => payload,
        };

        Ok((content, meta))
    }

    /// Unlink one staged payload and its meta.
    ///
    /// # Errors
    ///
    /// * the data file cannot be unlinked
    pub fn remove(&self, data_path: &std::path::Path) -> std::io::Result<()> {
        std::fs::remove_file(data_path)?;
        let meta = meta_path(data_path);
        if meta.exists() {
            std::fs::remove_file(meta)?;
        }
        Ok(())
    }

    /// Every staged payload awaiting drain, oldest first. Orphaned meta
    /// files (meta present, data gone) are garbage-collected on the way.
    ///
    /// # Errors
    ///
    /// * the staging directory cannot be listed
    pub fn retry_queue(&self) -> std::io::Result<Vec<std::path::PathBuf>> {
        let mut queue = vec![];

        for entry in self.dirpath.read_dir()? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(std::ffi::OsStr::to_str) else {
                continue;
            };

            if let Some(data_name) = name.strip_suffix(".meta") {
                if !self.dirpath.join(data_name).exists() {
                    tracing::debug!(meta = %path.display(), "Removing orphaned meta file.");
                    let _ = std::fs::remove_file(&path);
                }
                continue;
            }

            if meta_path(&path).exists() {
                queue.push(path);
            }
        }

        queue.sort_unstable();
        Ok(queue)
    }

    /// Unlink every staged payload older than the retention window.
    ///
    /// # Errors
    ///
    /// * the staging directory cannot be listed
    pub fn sweep_retention(&self) -> std::io::Result<usize> {
        let now = std::time::SystemTime::now();
        let mut removed = 0;

        for path in self.retry_queue()? {
            let Ok(modified) = std::fs::metadata(&path).and_then(|m| m.modified()) else {
                continue;
            };

            if now.duration_since(modified).unwrap_or_default() > self.retention {
                tracing::info!(path = %path.display(), "Retention elapsed, removing staged attachment.");
                if self.remove(&path).is_ok() {
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, EncryptionMeta), LocalStoreError> {
    let cipher = aes_gcm::Aes256Gcm::new_from_slice(key)
        .map_err(|e| LocalStoreError::Crypto(e.to_string()))?;

    let iv: [u8; GCM_IV_LEN] = rand::random();
    let mut combined = cipher
        .encrypt(aes_gcm::Nonce::from_slice(&iv), plaintext)
        .map_err(|e| LocalStoreError::Crypto(e.to_string()))?;

    let auth_tag = combined.split_off(combined.len() - GCM_TAG_LEN);

    Ok((
        combined,
        EncryptionMeta {
            algorithm: "aes-256-gcm".to_string(),
            iv: hex::encode(iv),
            auth_tag: hex::encode(auth_tag),
            encrypted: true,
        },
    ))
}

fn decrypt(
    key: &[u8; 32],
    meta: &EncryptionMeta,
    ciphertext: &[u8],
) -> Result<Vec<u8>, LocalStoreError> {
    let cipher = aes_gcm::Aes256Gcm::new_from_slice(key)
        .map_err(|e| LocalStoreError::Crypto(e.to_string()))?;

    let iv = hex::decode(&meta.iv).map_err(|e| LocalStoreError::Crypto(e.to_string()))?;
    if iv.len() != GCM_IV_LEN {
        return Err(LocalStoreError::Crypto("invalid iv length".into()));
    }
    let auth_tag =
        hex::decode(&meta.auth_tag).map_err(|e| LocalStoreError::Crypto(e.to_string()))?;

    let mut combined = ciphertext.to_vec();
    combined.extend_from_slice(&auth_tag);

    cipher
        .decrypt(aes_gcm::Nonce::from_slice(&iv), combined.as_slice())
        .map_err(|_| LocalStoreError::Crypto("authentication tag mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn attachment(name: &str, content: &[u8]) -> Attachment {
        Attachment {
            filename: name.to_string(),
            content_type: "application/octet-stream".to_string(),
            content: content.to_vec(),
        }
    }

    fn plain_store(dir: &std::path::Path) -> LocalStore {
        LocalStore::init(dir.join("staging"), None, 24).unwrap()
    }

    #[test]
    fn save_writes_data_and_meta_with_0600() {
        let dir = tempfile::tempdir().unwrap();
        let store = plain_store(dir.path());

        let saved = store.save(&attachment("doc.pdf", b"%PDF-1.4")).unwrap();

        for path in [saved.path.clone(), meta_path(&saved.path)] {
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{}", path.display());
        }

        let (content, meta) = store.read(&saved.path).unwrap();
        assert_eq!(content, b"%PDF-1.4");
        assert_eq!(meta.original_name, "doc.pdf");
        assert_eq!(meta.size, 8);
        assert_eq!(meta.file_id, saved.file_id);
        assert!(meta.encryption.is_none());
    }

    #[test]
    fn filenames_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = plain_store(dir.path());

        let saved = store
            .save(&attachment("../../etc/passwd", b"nope"))
            .unwrap();

        let name = saved.path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("-passwd"));
        assert!(saved.path.parent().unwrap().ends_with("staging"));
    }

    #[test]
    fn encrypted_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let key = [0x42; 32];
        let store = LocalStore::init(dir.path().join("staging"), Some(key), 24).unwrap();

        let original = b"attachment bytes that deserve privacy".to_vec();
        let saved = store.save(&attachment("secret.bin", &original)).unwrap();

        // at rest the payload differs from the plaintext
        let at_rest = std::fs::read(&saved.path).unwrap();
        assert_ne!(at_rest, original);

        let (content, meta) = store.read(&saved.path).unwrap();
        assert_eq!(content, original);

        let encryption = meta.encryption.unwrap();
        assert_eq!(encryption.algorithm, "aes-256-gcm");
        assert_eq!(hex::decode(encryption.iv).unwrap().len(), GCM_IV_LEN);
        assert_eq!(hex::decode(encryption.auth_tag).unwrap().len(), GCM_TAG_LEN);
    }

    #[test]
    fn tampering_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let key = [0x42; 32];
        let store = LocalStore::init(dir.path().join("staging"), Some(key), 24).unwrap();

        let saved = store.save(&attachment("secret.bin", b"payload")).unwrap();

        let mut bytes = std::fs::read(&saved.path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&saved.path, bytes).unwrap();

        assert!(matches!(
            store.read(&saved.path),
            Err(LocalStoreError::Crypto(_))
        ));
    }

    #[test]
    fn retry_queue_collects_and_garbage_collects() {
        let dir = tempfile::tempdir().unwrap();
        let store = plain_store(dir.path());

        let kept = store.save(&attachment("kept.bin", b"kept")).unwrap();
        let orphan = store.save(&attachment("orphan.bin", b"orphan")).unwrap();

        // simulate a crash between data unlink and meta unlink
        std::fs::remove_file(&orphan.path).unwrap();
        assert!(meta_path(&orphan.path).exists());

        let queue = store.retry_queue().unwrap();
        pretty_assertions::assert_eq!(queue, vec![kept.path]);
        assert!(!meta_path(&orphan.path).exists());
    }

    #[test]
    fn retention_sweep_removes_old_payloads() {
        let dir = tempfile::tempdir().unwrap();
        // zero hours of retention: everything is already too old
        let store = LocalStore::init(dir.path().join("staging"), None, 0).unwrap();

        let saved = store.save(&attachment("old.bin", b"old")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));

        assert_eq!(store.sweep_retention().unwrap(), 1);
        assert!(!saved.path.exists());
        assert!(!meta_path(&saved.path).exists());
    }

    #[test]
    fn remove_unlinks_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = plain_store(dir.path());

        let saved = store.save(&attachment("gone.bin", b"gone")).unwrap();
        store.remove(&saved.path).unwrap();

        assert!(!saved.path.exists());
        assert!(!meta_path(&saved.path).exists());
        assert!(store.retry_queue().unwrap().is_empty());
    }
}
