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

//! vHook configuration
//!
//! The [`Config`] tree is loaded from an optional TOML file, overlaid with
//! the recognized environment variables, then validated. All fields default
//! when missing.

#![doc(html_no_source)]
#![forbid(unsafe_code)]
//
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::multiple_crate_versions)]

mod config;
mod default;
mod ensure;
mod env;
mod rustls_helper;
mod secret;

pub use config::{field, Config};
pub use rustls_helper::get_rustls_config;
pub use secret::parse_encryption_key;
