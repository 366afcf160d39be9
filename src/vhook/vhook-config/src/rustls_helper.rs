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
use crate::field::FieldServerTls;
use anyhow::Context;

/// Build the rustls server configuration from the PEM files on disk.
///
/// # Errors
///
/// * a file cannot be read or holds no usable certificate/key
/// * the certificate and key do not match
pub fn get_rustls_config(tls: &FieldServerTls) -> anyhow::Result<rustls::ServerConfig> {
    let certs = {
        let mut reader = std::io::BufReader::new(
            std::fs::File::open(&tls.certificate).with_context(|| {
                format!("cannot read certificate '{}'", tls.certificate.display())
            })?,
        );
        rustls_pemfile::certs(&mut reader)
            .collect::<std::io::Result<Vec<_>>>()
            .context("invalid certificate chain")?
    };
    anyhow::ensure!(
        !certs.is_empty(),
        "no certificate found in '{}'",
        tls.certificate.display()
    );

    let private_key = {
        let mut reader = std::io::BufReader::new(
            std::fs::File::open(&tls.private_key).with_context(|| {
                format!("cannot read private key '{}'", tls.private_key.display())
            })?,
        );
        rustls_pemfile::private_key(&mut reader)
            .context("invalid private key")?
            .ok_or_else(|| {
                anyhow::anyhow!("no private key found in '{}'", tls.private_key.display())
            })?
    };

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .context("certificate and private key do not match")
}
