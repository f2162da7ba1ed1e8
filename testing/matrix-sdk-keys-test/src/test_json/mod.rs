//! Test data for the matrix-sdk-keys crate.
//!
//! Exporting each static allows all the test data to have a single source of
//! truth.

use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};

pub mod api_responses;

pub use api_responses::{
    DEVICES, KEYS_CLAIM, KEYS_CLAIM_EMPTY, KEYS_QUERY, KEYS_QUERY_WITH_FAILURES, KEYS_UPLOAD,
    KEY_CHANGES, LIMIT_EXCEEDED, UIAA_PASSWORD,
};

/// An empty response.
pub static EMPTY: Lazy<JsonValue> = Lazy::new(|| json!({}));
