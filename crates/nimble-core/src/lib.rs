//! # nimble-core
//!
//! Shared building blocks for the nimble server:
//!
//! - [`codec`]: transport packet framing and message envelopes
//! - [`errors`]: codec error type
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod logging;

pub use errors::CodecError;
