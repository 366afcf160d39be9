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

//! vHook common definitions
//!
//! Data structures shared by every crate of the relay: the parsed email and
//! its JSON projection, attachments before and after storage, the durable
//! delivery task, SMTP replies and the transaction stage, and the
//! recoverable-network error classifier.

#![doc(html_no_source)]
#![forbid(unsafe_code)]
//
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::multiple_crate_versions)]

mod attachment;
mod email;
mod net_error;
mod stage;
mod task;

/// SMTP replies send by the server to the client.
pub mod reply;

pub use attachment::{Attachment, StoredAttachment};
pub use email::{AddressList, AttachmentInfo, Headers, Mailbox, ParsedEmail, SkippedAttachment, StorageSummary};
pub use net_error::is_recoverable_network;
pub use reply::{Reply, ReplyCode};
pub use stage::Stage;
pub use task::Task;
