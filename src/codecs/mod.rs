//! Wire formats for metrics handed to the store.

mod json;

pub use json::{JsonSerializer, JsonSerializerConfig, SerializeError};
