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
use vhook_config::field::FieldS3;

/// Failure of the primary store; always recoverable through the local
/// fallback, never user-visible.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    /// The backend rejected or never received the request.
    #[error("object store backend error: {0}")]
    Backend(String),
}

/// Minimal object-store surface the tier relies on; the SDK stays behind
/// this seam.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload one object and return its durable URL.
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ObjectStoreError>;
}

/// S3-backed implementation.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base: String,
}

impl S3Store {
    /// Build a client from the configured region, credentials and optional
    /// custom endpoint.
    pub async fn new(config: &FieldS3) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "vhook-config",
        );

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let public_base = config.endpoint.as_ref().map_or_else(
            || {
                format!(
                    "https://{}.s3.{}.amazonaws.com",
                    config.bucket, config.region
                )
            },
            |endpoint| format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            public_base,
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ObjectStoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(aws_sdk_s3::primitives::ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| ObjectStoreError::Backend(err.to_string()))?;

        Ok(format!("{}/{key}", self.public_base))
    }
}
