//! vHook executable

#![doc(html_no_source)]
#![forbid(unsafe_code)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::multiple_crate_versions)]

mod args;

/// Initialization of the tracing subscriber.
pub mod tracing_subscriber;

pub use args::{Args, Commands};
