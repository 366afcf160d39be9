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

//! vHook SMTP protocol layer
//!
//! The wire side of the receiver: command tokenization, argument parsing,
//! reply emission and the session state machine. The policy side lives in
//! the server crate behind the [`ReceiverHandler`] trait; this crate is the
//! only place aware of the byte-level SMTP exchange.

#![doc(html_no_source)]
#![forbid(unsafe_code)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::multiple_crate_versions)]

mod command;
mod receiver;
mod receiver_handler;
mod sink;
mod stream;

pub use command::{
    AcceptArgs, ClientName, EhloArgs, HeloArgs, MailFromArgs, ParseArgsError, RcptToArgs,
    UnparsedArgs, Verb,
};
pub use receiver::{Receiver, ReceiverContext};
pub use receiver_handler::ReceiverHandler;
pub use sink::Sink;
pub use stream::{Error, Stream};
