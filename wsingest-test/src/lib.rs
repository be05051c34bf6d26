//! Helpers for testing the WebSocket input.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`wsingest_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!  - Use an [`Accumulator`] as the sink to collect metrics and wait for their arrival.
//!  - Use [`MockServer`] as the peer of a client mode input, and [`MockClient`] as the peer of a
//!    server mode input.
//!
//! # Example
//!
//! ```no_run
//! #[tokio::test]
//! async fn my_test() {
//!     wsingest_test::setup();
//!
//!     let server = wsingest_test::MockServer::start("/telegraf").await;
//!     wsingest_log::debug!(url = server.url(), "mock server started");
//! }
//! ```

#![warn(missing_docs)]

mod mock;
mod sink;

pub use self::mock::*;
pub use self::sink::*;

/// Setup the test environment.
///
///  - Initializes logs: The logger captures logs from all wsingest crates and mutes all other
///    logs.
pub fn setup() {
    wsingest_log::init_test!("wsingest");
}
