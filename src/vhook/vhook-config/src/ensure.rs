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
use crate::Config;

impl Config {
    /// Check the coherence of the configuration, and the hardening gate
    /// when [`Config::production`] is set.
    ///
    /// # Errors
    ///
    /// * secure mode without TLS material
    /// * an encryption key of the wrong size or encoding
    /// * in production: missing trusted-relay enforcement, relay IPs,
    ///   recipient-domain allow-list or webhook secret, or insecure HTTP
    ///   webhooks allowed
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.server.secure || self.server.tls.is_some(),
            "`server.secure` requires TLS certificate and private key"
        );

        anyhow::ensure!(
            self.webhook.concurrency > 0,
            "`webhook.concurrency` must be at least 1"
        );

        if let Some(key) = &self.storage.encryption_key {
            crate::secret::parse_encryption_key(key)?;
        }

        if self.production {
            anyhow::ensure!(
                self.server.policy.require_trusted_relay,
                "production requires `require_trusted_relay`"
            );
            anyhow::ensure!(
                !self.server.policy.trusted_relay_ips.is_empty(),
                "production requires a non-empty `trusted_relay_ips`"
            );
            anyhow::ensure!(
                !self.server.policy.allowed_recipient_domains.is_empty(),
                "production requires a non-empty `allowed_recipient_domains`"
            );
            anyhow::ensure!(
                self.webhook.secret.is_some(),
                "production requires a webhook secret"
            );
            anyhow::ensure!(
                !self.webhook.allow_insecure_http,
                "production forbids `allow_insecure_http`"
            );
            // NOTE: `server.secure = false` stays allowed, the relay commonly
            //       sits behind a TLS-terminating upstream.
        }

        Ok(())
    }
}
