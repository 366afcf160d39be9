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

//! vHook attachment storage tier
//!
//! Two back-ends and a reconciler: attachments go to the primary object
//! store when it is configured and reachable, fall back to an (optionally
//! encrypted) local staging directory otherwise, and a background loop
//! drains the staging area back into the object store. Everything above the
//! byte level is expressed in [`vhook_common::StoredAttachment`] variants.

#![doc(html_no_source)]
#![forbid(unsafe_code)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::multiple_crate_versions)]

mod local;
mod object_store;
mod tier;

pub use local::{EncryptionMeta, LocalMeta, LocalStore, LocalStoreError, SavedLocal};
pub use object_store::{ObjectStore, ObjectStoreError, S3Store};
pub use tier::{AttachmentStorage, StoredSet};
