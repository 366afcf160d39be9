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
use anyhow::Context;

/// This structure contains all the fields to configure the relay at startup.
///
/// Loaded from the TOML file given by `-c, --config`, then overlaid with the
/// environment (see [`Config::from_env_overlay`]). All fields are optional
/// and defaulted if missing.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// see [`field::FieldServer`]
    #[serde(default)]
    pub server: field::FieldServer,
    /// see [`field::FieldWebhook`]
    #[serde(default)]
    pub webhook: field::FieldWebhook,
    /// see [`field::FieldStorage`]
    #[serde(default)]
    pub storage: field::FieldStorage,
    /// see [`field::FieldQueue`]
    #[serde(default)]
    pub queue: field::FieldQueue,
    /// see [`field::FieldLogs`]
    #[serde(default)]
    pub logs: field::FieldLogs,
    /// Production hardening gate, see [`Config::validate`].
    #[serde(default)]
    pub production: bool,
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config is valid")
    }
}

impl Config {
    /// Parse an instance from a TOML document.
    ///
    /// # Errors
    ///
    /// * the document is not valid TOML or contains unknown fields
    pub fn from_toml(input: &str) -> anyhow::Result<Self> {
        toml::from_str(input).context("invalid configuration format")
    }

    /// Load the file at `path` and parse it.
    ///
    /// # Errors
    ///
    /// * the file cannot be read
    /// * see [`Config::from_toml`]
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read file '{}'", path.display()))?;
        Self::from_toml(&content)
    }
}

/// The inner fields of the vHook configuration.
#[allow(clippy::module_name_repetitions)]
pub mod field {
    use crate::default;

    /// Network, TLS and admission parameters of the SMTP receiver.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServer {
        /// Name the server greets with and announces on `EHLO`.
        #[serde(default = "default::server_domain")]
        pub domain: String,
        /// Address the SMTP listener binds to.
        #[serde(default = "default::server_addr")]
        pub addr: std::net::SocketAddr,
        /// When `true`, sessions are TLS-tunneled from the first byte and
        /// [`FieldServer::tls`] is required.
        #[serde(default)]
        pub secure: bool,
        /// see [`FieldServerTls`]
        pub tls: Option<FieldServerTls>,
        /// Maximum number of clients served at the same time.
        ///
        /// The client is rejected if the server is full. `-1` disables the cap.
        #[serde(default = "default::client_count_max")]
        pub client_count_max: i64,
        /// Maximum size in bytes of the message.
        #[serde(default = "default::message_size_limit")]
        pub message_size_limit: usize,
        /// Delay without a complete command before the session is dropped.
        #[serde(with = "humantime_serde", default = "default::socket_timeout")]
        pub socket_timeout: std::time::Duration,
        /// Grace period granted to in-flight sessions on shutdown.
        #[serde(with = "humantime_serde", default = "default::close_timeout")]
        pub close_timeout: std::time::Duration,
        /// see [`FieldRateLimit`]
        #[serde(default)]
        pub rate_limit: FieldRateLimit,
        /// see [`FieldPolicy`]
        #[serde(default)]
        pub policy: FieldPolicy,
    }

    /// TLS material of the receiver, required when
    /// [`FieldServer::secure`] is set.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerTls {
        /// Path of the PEM certificate chain.
        pub certificate: std::path::PathBuf,
        /// Path of the PEM private key.
        pub private_key: std::path::PathBuf,
        /// Timeout for the TLS handshake.
        #[serde(with = "humantime_serde", default = "default::tls_handshake_timeout")]
        pub handshake_timeout: std::time::Duration,
    }

    /// Sliding-window connection rate limit, keyed by the remote IP.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldRateLimit {
        /// Width of the window.
        #[serde(with = "humantime_serde", default = "default::rate_limit_window")]
        pub window: std::time::Duration,
        /// Connections admitted inside one window; the next one is rejected
        /// with a 421.
        #[serde(default = "default::rate_limit_max_connections")]
        pub max_connections: usize,
    }

    impl Default for FieldRateLimit {
        fn default() -> Self {
            serde_json::from_str("{}").expect("empty rate limit config is valid")
        }
    }

    /// Admission policy of the receiver.
    #[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldPolicy {
        /// When non-empty, only these client IPs may connect.
        #[serde(default)]
        pub allowed_smtp_clients: Vec<String>,
        /// IPs of the upstream relays trusted to have performed
        /// SPF/DKIM/DMARC evaluation.
        #[serde(default)]
        pub trusted_relay_ips: Vec<String>,
        /// Reject connections from IPs outside
        /// [`FieldPolicy::trusted_relay_ips`].
        #[serde(default)]
        pub require_trusted_relay: bool,
        /// When non-empty, `MAIL FROM` domains must match.
        #[serde(default)]
        pub allowed_sender_domains: Vec<String>,
        /// When non-empty, `RCPT TO` domains must match.
        #[serde(default)]
        pub allowed_recipient_domains: Vec<String>,
        /// Tokens that must all appear in the `Authentication-Results`
        /// header of messages from trusted relays, e.g. `spf=pass`.
        #[serde(default)]
        pub required_auth_results: Vec<String>,
    }

    /// Webhook routing and dispatch parameters.
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldWebhook {
        /// Default URL, targeted when no rule matched.
        pub url: Option<String>,
        /// Routing rules, either a JSON array, an object with a `rules`
        /// array, or a native list. Malformed input yields zero rules.
        pub rules: Option<serde_json::Value>,
        /// Shared secret for the payload signature headers.
        pub secret: Option<String>,
        /// Timeout of one webhook POST.
        #[serde(with = "humantime_serde", default = "default::webhook_timeout")]
        pub timeout: std::time::Duration,
        /// Size of the dispatcher worker pool.
        #[serde(default = "default::webhook_concurrency")]
        pub concurrency: usize,
        /// Delay before a fully failed task is re-enqueued.
        #[serde(with = "humantime_serde", default = "default::webhook_retry_delay")]
        pub retry_delay: std::time::Duration,
        /// Allow `http://` webhook targets. Forbidden in production.
        #[serde(default)]
        pub allow_insecure_http: bool,
        /// In-memory dispatcher backlog above which `DATA` is refused
        /// with a 451.
        #[serde(default = "default::max_queue_size")]
        pub max_queue_size: usize,
    }

    impl Default for FieldWebhook {
        fn default() -> Self {
            serde_json::from_str("{}").expect("empty webhook config is valid")
        }
    }

    /// Attachment storage tier parameters.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldStorage {
        /// see [`FieldS3`]. Absent means every attachment goes to the
        /// local fallback.
        pub s3: Option<FieldS3>,
        /// Attachments above this size are skipped without touching any
        /// backend.
        #[serde(default = "default::max_file_size")]
        pub max_file_size: usize,
        /// Directory of the local fallback staging area.
        #[serde(default = "default::local_path")]
        pub local_path: std::path::PathBuf,
        /// Hours a locally staged payload survives before the retention
        /// sweep unlinks it.
        #[serde(default = "default::retention_hours")]
        pub retention_hours: u64,
        /// 32-byte key, hex or base64 encoded, enabling AES-256-GCM
        /// encryption at rest of the local staging area.
        pub encryption_key: Option<String>,
        /// Period of the reconciliation loop draining the local staging
        /// area into the object store.
        #[serde(with = "humantime_serde", default = "default::s3_retry_interval")]
        pub s3_retry_interval: std::time::Duration,
        /// Upload attempts granted to one staged payload before it is left
        /// to the retention sweep.
        #[serde(default = "default::s3_max_retries")]
        pub s3_max_retries: u32,
    }

    impl Default for FieldStorage {
        fn default() -> Self {
            serde_json::from_str("{}").expect("empty storage config is valid")
        }
    }

    /// Object store endpoint and credentials.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldS3 {
        /// Region of the bucket.
        pub region: String,
        /// Access key id.
        pub access_key_id: String,
        /// Secret access key.
        #[serde(skip_serializing)]
        pub secret_access_key: String,
        /// Bucket receiving the attachments.
        pub bucket: String,
        /// Custom endpoint for S3-compatible stores.
        pub endpoint: Option<String>,
        /// Path-style addressing, needed by most S3-compatible stores.
        #[serde(default)]
        pub force_path_style: bool,
    }

    /// Durable queue parameters.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldQueue {
        /// Directory holding one JSON file per pending task.
        #[serde(default = "default::queue_dirpath")]
        pub dirpath: std::path::PathBuf,
    }

    impl Default for FieldQueue {
        fn default() -> Self {
            serde_json::from_str("{}").expect("empty queue config is valid")
        }
    }

    /// Log parameters.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldLogs {
        /// Filter directives handed to the tracing subscriber,
        /// e.g. `["info", "vhook_dispatch=debug"]`.
        #[serde(default = "default::log_level")]
        pub level: Vec<String>,
    }

    impl Default for FieldLogs {
        fn default() -> Self {
            serde_json::from_str("{}").expect("empty log config is valid")
        }
    }

    impl Default for FieldServer {
        fn default() -> Self {
            serde_json::from_str("{}").expect("empty server config is valid")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_consistent() {
        let config = Config::default();
        assert_eq!(config.server.addr.port(), 25);
        assert_eq!(config.webhook.concurrency, 5);
        assert_eq!(config.webhook.timeout, std::time::Duration::from_secs(5));
        assert!(!config.production);
    }

    #[test]
    fn from_toml() {
        let config = Config::from_toml(
            r#"
production = true

[server]
addr = "0.0.0.0:2525"

[server.policy]
allowed_recipient_domains = ["example.com"]

[webhook]
url = "https://hooks.example.com/inbound"
concurrency = 10
"#,
        )
        .unwrap();

        assert_eq!(config.server.addr.port(), 2525);
        assert_eq!(
            config.server.policy.allowed_recipient_domains,
            ["example.com"]
        );
        assert_eq!(config.webhook.concurrency, 10);
        assert!(config.production);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Config::from_toml("[server]\nnot_a_field = 1").is_err());
    }
}
