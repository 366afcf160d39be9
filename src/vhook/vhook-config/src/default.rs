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

//! Per-field default values of the configuration.

pub fn server_domain() -> String {
    "localhost".to_string()
}

pub fn server_addr() -> std::net::SocketAddr {
    "0.0.0.0:25".parse().expect("valid address")
}

pub const fn client_count_max() -> i64 {
    50
}

pub const fn message_size_limit() -> usize {
    // 10MB
    10_485_760
}

pub const fn socket_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}

pub const fn close_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}

pub const fn tls_handshake_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(10)
}

pub const fn rate_limit_window() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}

pub const fn rate_limit_max_connections() -> usize {
    100
}

pub const fn webhook_timeout() -> std::time::Duration {
    std::time::Duration::from_millis(5000)
}

pub const fn webhook_concurrency() -> usize {
    5
}

pub const fn webhook_retry_delay() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}

pub const fn max_queue_size() -> usize {
    1000
}

pub const fn max_file_size() -> usize {
    // 5MB
    5_242_880
}

pub fn local_path() -> std::path::PathBuf {
    "/var/spool/vhook/attachments".into()
}

pub const fn retention_hours() -> u64 {
    24
}

pub const fn s3_retry_interval() -> std::time::Duration {
    std::time::Duration::from_secs(5 * 60)
}

pub const fn s3_max_retries() -> u32 {
    5
}

pub fn queue_dirpath() -> std::path::PathBuf {
    "/var/spool/vhook/queue".into()
}

pub fn log_level() -> Vec<String> {
    vec!["info".to_string()]
}
