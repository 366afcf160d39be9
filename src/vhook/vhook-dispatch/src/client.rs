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
use hmac::Mac;
use vhook_router::Target;

const USER_AGENT: &str = concat!("vhook/", env!("CARGO_PKG_VERSION"));

/// Outcome of one POST to one target.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    /// The target URL.
    pub webhook: String,
    /// The rule that selected it.
    pub rule_name: String,
    /// HTTP status, when a response came back at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// 2xx only.
    pub success: bool,
    /// Transport or status error, for the task's `last_error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `sha256=<hex HMAC-SHA256(secret, "<timestamp>.<payload>")>`, the
/// signature consumers verify before trusting a payload.
#[must_use]
pub fn sign_payload(secret: &str, timestamp_millis: u128, payload: &str) -> String {
    let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any size");
    mac.update(timestamp_millis.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());

    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// The outbound HTTP side of the dispatcher.
pub struct WebhookClient {
    http: reqwest::Client,
    timeout: std::time::Duration,
    secret: Option<String>,
}

impl WebhookClient {
    /// Build the shared HTTP client.
    ///
    /// # Errors
    ///
    /// * the TLS backend cannot be initialized
    pub fn new(timeout: std::time::Duration, secret: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()?,
            timeout,
            secret,
        })
    }

    /// POST the email payload merged with `_webhookMeta` to one target.
    /// 2xx is a success, any other response or a transport error is a
    /// failure recorded in the outcome.
    pub async fn post(&self, target: &Target, email: &serde_json::Value) -> DeliveryOutcome {
        let mut payload = email.clone();
        if let Some(object) = payload.as_object_mut() {
            object.insert(
                "_webhookMeta".to_string(),
                serde_json::to_value(target).expect("target serialization cannot fail"),
            );
        }
        let body = payload.to_string();

        let mut request = self
            .http
            .post(&target.webhook)
            .timeout(self.timeout)
            .header("Content-Type", "application/json");

        if let Some(secret) = &self.secret {
            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system clock set before the unix epoch")
                .as_millis();

            request = request
                .header("X-Inbound-Email-Timestamp", timestamp.to_string())
                .header(
                    "X-Inbound-Email-Signature",
                    sign_payload(secret, timestamp, &body),
                )
                .header("X-Inbound-Email-Signature-Version", "v1");
        }

        match request.body(body).send().await {
            Ok(response) => {
                let status = response.status();
                DeliveryOutcome {
                    webhook: target.webhook.clone(),
                    rule_name: target.rule_name.clone(),
                    status: Some(status.as_u16()),
                    success: status.is_success(),
                    error: (!status.is_success())
                        .then(|| format!("webhook answered {status}")),
                }
            }
            Err(error) => DeliveryOutcome {
                webhook: target.webhook.clone(),
                rule_name: target.rule_name.clone(),
                status: None,
                success: false,
                error: Some(error.to_string()),
            },
        }
    }
}
