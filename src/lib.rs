//! Azure Data Explorer metrics sink.
//!
//! Takes batches of metrics, groups them into per-table payloads and hands
//! each payload to a lazily created, per-table ingestor. Destination tables
//! and their JSON ingestion mappings are provisioned on first use.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::type_complexity)] // long-types happen, especially in async code

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;
pub mod codecs;
pub mod event;
pub mod sinks;
#[cfg(test)]
pub mod test_util;
pub mod trace;

/// The basic error type, dynamically dispatched and safe to send across
/// threads.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The basic result type, defined in terms of [`Error`] and generic over
/// `T`.
pub type Result<T> = std::result::Result<T, Error>;
