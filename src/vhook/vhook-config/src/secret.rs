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
use base64::Engine;

/// Decode the 32-byte encryption key of the local staging area, accepting
/// hex (64 chars) or base64.
///
/// # Errors
///
/// * the value decodes under neither encoding
/// * the decoded key is not exactly 32 bytes
pub fn parse_encryption_key(raw: &str) -> anyhow::Result<[u8; 32]> {
    let raw = raw.trim();

    let decoded = if raw.len() == 64 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(raw).expect("checked hex digits above")
    } else {
        base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|_| anyhow::anyhow!("encryption key is neither hex nor base64"))?
    };

    <[u8; 32]>::try_from(decoded.as_slice())
        .map_err(|_| anyhow::anyhow!("encryption key must be exactly 32 bytes"))
}
