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

//! vHook webhook router
//!
//! Evaluates the declarative rule set against a parsed email and produces
//! the ordered fan-out target list. The router is pure: the same email and
//! the same rule set always produce the same decision.

#![doc(html_no_source)]
#![forbid(unsafe_code)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::multiple_crate_versions)]

mod matcher;
mod rule;
mod router;

pub use matcher::Matcher;
pub use router::{Router, Target, DEFAULT_TARGET_PRIORITY};
pub use rule::{Rule, DEFAULT_RULE_PRIORITY};
