//! Test harness for the Lumora engine.
//!
//! Provides an in-memory device backend so registry and mirror behavior
//! (dirty-region soundness, growth, binding order) is checkable without a
//! physical GPU.

pub mod mock;

pub use mock::{MockDevice, UploadEvent};

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for tests, honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs the
/// subscriber.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
