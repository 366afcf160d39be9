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

//! vHook dispatcher
//!
//! Consumes task ids, routes each parsed email through the rule set and
//! POSTs the signed JSON payload to every selected webhook, with bounded
//! concurrency, per-target accounting, in-worker exponential retry and
//! deferred re-enqueue of the failed subset. A task leaves the durable
//! queue only when every selected target has answered 2xx.

#![doc(html_no_source)]
#![forbid(unsafe_code)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::multiple_crate_versions)]

mod client;
mod dispatcher;
mod scheduler;

pub use client::{sign_payload, DeliveryOutcome, WebhookClient};
pub use dispatcher::Dispatcher;
pub use scheduler::Scheduler;
