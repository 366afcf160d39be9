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

//! vHook SMTP server
//!
//! The receiving side of the relay: the TCP accept loop, the per-session
//! policy hooks (allow-lists, trusted relays, rate limiting, domain and
//! authentication-results enforcement), MIME extraction into the parsed
//! email, task persistence, and the graceful shutdown path.

#![doc(html_no_source)]
#![forbid(unsafe_code)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::multiple_crate_versions)]

mod extract;
mod handler;
mod policy;
mod runtime;
mod server;
mod shutdown;

pub use extract::extract;
pub use handler::Handler;
pub use policy::{domain_allowed, normalize_ip, RateLimiter};
pub use runtime::start_runtime;
pub use server::{socket_bind_anyhow, Server};
pub use shutdown::{drain_dispatcher, wait_for_signal};
