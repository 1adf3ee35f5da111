//! Shared value types for external calls.

mod request;

pub use request::{CallFingerprint, CallRequest, DecodingParams};
