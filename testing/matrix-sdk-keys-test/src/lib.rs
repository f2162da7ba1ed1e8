//! Test helpers for the matrix-sdk-keys crate: JSON fixtures of the key
//! exchange endpoints and a [`wiremock`] server mocking them.

use std::sync::Once;

pub mod mocks;
pub mod test_json;

pub use self::mocks::{KeysMock, KeysMockServer, MockEndpoint};

/// The access token the mocked endpoints expect by default.
pub const DEFAULT_ACCESS_TOKEN: &str = "1234";

/// Install a `tracing` subscriber writing to the test output, filtered with
/// `RUST_LOG`.
///
/// Can be called any number of times, only the first call has an effect.
pub fn init_tracing_for_tests() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .init();
    });
}
