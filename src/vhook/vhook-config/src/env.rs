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
use crate::{field::FieldS3, field::FieldServerTls, Config};
use anyhow::Context;

impl Config {
    /// Build a configuration from the defaults overlaid with the process
    /// environment.
    ///
    /// # Errors
    ///
    /// * a recognized variable holds an unparsable value
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        config.overlay(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Overlay the environment on top of a file-loaded configuration.
    ///
    /// # Errors
    ///
    /// * a recognized variable holds an unparsable value
    pub fn from_env_overlay(mut self) -> anyhow::Result<Self> {
        self.overlay(|name| std::env::var(name).ok())?;
        Ok(self)
    }

    #[allow(clippy::too_many_lines)]
    pub(crate) fn overlay(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(url) = lookup("WEBHOOK_URL") {
            self.webhook.url = Some(url);
        }
        if let Some(rules) = lookup("WEBHOOK_RULES") {
            self.webhook.rules = Some(serde_json::Value::String(rules));
        }
        if let Some(secret) = lookup("WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
        if let Some(ms) = parse(&lookup, "WEBHOOK_TIMEOUT")? {
            self.webhook.timeout = std::time::Duration::from_millis(ms);
        }
        if let Some(concurrency) = parse(&lookup, "WEBHOOK_CONCURRENCY")? {
            self.webhook.concurrency = concurrency;
        }
        if let Some(ms) = parse(&lookup, "WEBHOOK_RETRY_DELAY_MS")? {
            self.webhook.retry_delay = std::time::Duration::from_millis(ms);
        }
        if let Some(allow) = parse_bool(&lookup, "ALLOW_INSECURE_WEBHOOK_HTTP") {
            self.webhook.allow_insecure_http = allow;
        }
        if let Some(size) = parse(&lookup, "MAX_QUEUE_SIZE")? {
            self.webhook.max_queue_size = size;
        }

        if let Some(port) = parse(&lookup, "PORT")? {
            self.server.addr.set_port(port);
        }
        if let Some(secure) = parse_bool(&lookup, "SMTP_SECURE") {
            self.server.secure = secure;
        }
        if let Some(max) = parse(&lookup, "SMTP_MAX_CLIENTS")? {
            self.server.client_count_max = max;
        }
        if let Some(ms) = parse(&lookup, "SMTP_SOCKET_TIMEOUT")? {
            self.server.socket_timeout = std::time::Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "SMTP_CLOSE_TIMEOUT")? {
            self.server.close_timeout = std::time::Duration::from_millis(ms);
        }
        if let Some(size) = parse(&lookup, "SMTP_MAX_MESSAGE_SIZE")? {
            self.server.message_size_limit = size;
        }
        if let Some(ms) = parse(&lookup, "SMTP_RATE_LIMIT_WINDOW_MS")? {
            self.server.rate_limit.window = std::time::Duration::from_millis(ms);
        }
        if let Some(max) = parse(&lookup, "SMTP_RATE_LIMIT_MAX_CONNECTIONS")? {
            self.server.rate_limit.max_connections = max;
        }

        if let Some(domains) = parse_list(&lookup, "ALLOWED_RECIPIENT_DOMAINS") {
            self.server.policy.allowed_recipient_domains = domains;
        }
        if let Some(domains) = parse_list(&lookup, "ALLOWED_SENDER_DOMAINS") {
            self.server.policy.allowed_sender_domains = domains;
        }
        if let Some(clients) = parse_list(&lookup, "ALLOWED_SMTP_CLIENTS") {
            self.server.policy.allowed_smtp_clients = clients;
        }
        if let Some(relays) = parse_list(&lookup, "TRUSTED_RELAY_IPS") {
            self.server.policy.trusted_relay_ips = relays;
        }
        if let Some(required) = parse_bool(&lookup, "REQUIRE_TRUSTED_RELAY") {
            self.server.policy.require_trusted_relay = required;
        }
        if let Some(tokens) = parse_list(&lookup, "REQUIRED_AUTH_RESULTS") {
            self.server.policy.required_auth_results = tokens;
        }

        if let (Some(region), Some(access_key_id), Some(secret_access_key), Some(bucket)) = (
            lookup("S3_REGION"),
            lookup("S3_ACCESS_KEY_ID"),
            lookup("S3_SECRET_ACCESS_KEY"),
            lookup("S3_BUCKET"),
        ) {
            self.storage.s3 = Some(FieldS3 {
                region,
                access_key_id,
                secret_access_key,
                bucket,
                endpoint: lookup("S3_ENDPOINT"),
                force_path_style: parse_bool(&lookup, "S3_FORCE_PATH_STYLE").unwrap_or(false),
            });
        }
        if let Some(size) = parse(&lookup, "MAX_FILE_SIZE")? {
            self.storage.max_file_size = size;
        }
        if let Some(path) = lookup("LOCAL_STORAGE_PATH") {
            self.storage.local_path = path.into();
        }
        if let Some(hours) = parse(&lookup, "LOCAL_STORAGE_RETENTION")? {
            self.storage.retention_hours = hours;
        }
        if let Some(key) = lookup("LOCAL_STORAGE_ENCRYPTION_KEY") {
            self.storage.encryption_key = Some(key);
        }
        if let Some(path) = lookup("DURABLE_QUEUE_PATH") {
            self.queue.dirpath = path.into();
        }
        if let Some(minutes) = parse::<u64>(&lookup, "S3_RETRY_INTERVAL")? {
            self.storage.s3_retry_interval = std::time::Duration::from_secs(minutes * 60);
        }
        if let Some(retries) = parse(&lookup, "S3_MAX_RETRIES")? {
            self.storage.s3_max_retries = retries;
        }

        if let (Some(certificate), Some(private_key)) =
            (lookup("TLS_CERT_PATH"), lookup("TLS_KEY_PATH"))
        {
            self.server.tls = Some(FieldServerTls {
                certificate: certificate.into(),
                private_key: private_key.into(),
                handshake_timeout: crate::default::tls_handshake_timeout(),
            });
        }

        if lookup("NODE_ENV").as_deref() == Some("production")
            || parse_bool(&lookup, "PRODUCTION").unwrap_or(false)
        {
            self.production = true;
        }

        Ok(())
    }
}

fn parse<T>(lookup: impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for `{name}`: '{value}'"))
        })
        .transpose()
}

fn parse_bool(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    lookup(name).map(|value| matches!(value.trim(), "true" | "TRUE" | "1" | "yes"))
}

/// A list variable is either a JSON array of strings or a comma-separated
/// value.
fn parse_list(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<Vec<String>> {
    let raw = lookup(name)?;

    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(&raw) {
        return Some(
            items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        );
    }

    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + '_ {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn overlay_basic() {
        let mut config = Config::default();
        config
            .overlay(lookup_from(&[
                ("WEBHOOK_URL", "https://hooks.example.com/in"),
                ("WEBHOOK_TIMEOUT", "2500"),
                ("PORT", "2525"),
                ("SMTP_RATE_LIMIT_WINDOW_MS", "1000"),
                ("SMTP_RATE_LIMIT_MAX_CONNECTIONS", "3"),
                ("REQUIRED_AUTH_RESULTS", r#"["spf=pass","dmarc=pass"]"#),
                ("ALLOWED_RECIPIENT_DOMAINS", "example.com, example.org"),
                ("NODE_ENV", "production"),
            ]))
            .unwrap();

        assert_eq!(
            config.webhook.url.as_deref(),
            Some("https://hooks.example.com/in")
        );
        assert_eq!(
            config.webhook.timeout,
            std::time::Duration::from_millis(2500)
        );
        assert_eq!(config.server.addr.port(), 2525);
        assert_eq!(
            config.server.rate_limit.window,
            std::time::Duration::from_millis(1000)
        );
        assert_eq!(config.server.rate_limit.max_connections, 3);
        assert_eq!(
            config.server.policy.required_auth_results,
            ["spf=pass", "dmarc=pass"]
        );
        assert_eq!(
            config.server.policy.allowed_recipient_domains,
            ["example.com", "example.org"]
        );
        assert!(config.production);
    }

    #[test]
    fn s3_requires_the_full_credential_set() {
        let mut config = Config::default();
        config
            .overlay(lookup_from(&[
                ("S3_REGION", "eu-west-3"),
                ("S3_BUCKET", "vhook-attachments"),
            ]))
            .unwrap();
        assert!(config.storage.s3.is_none());

        config
            .overlay(lookup_from(&[
                ("S3_REGION", "eu-west-3"),
                ("S3_ACCESS_KEY_ID", "AKIA000"),
                ("S3_SECRET_ACCESS_KEY", "secret"),
                ("S3_BUCKET", "vhook-attachments"),
                ("S3_ENDPOINT", "https://minio.internal:9000"),
                ("S3_FORCE_PATH_STYLE", "true"),
            ]))
            .unwrap();

        let s3 = config.storage.s3.unwrap();
        assert_eq!(s3.bucket, "vhook-attachments");
        assert!(s3.force_path_style);
    }

    #[test]
    fn invalid_number_is_an_error() {
        let mut config = Config::default();
        assert!(config
            .overlay(lookup_from(&[("WEBHOOK_CONCURRENCY", "lots")]))
            .is_err());
    }
}
