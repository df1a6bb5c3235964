//! Tracing initialisation for tests.
//!
//! [`init_test_tracing`] installs a subscriber at most once per process, so
//! every test may call it.

use tracing_subscriber::EnvFilter;

/// Route tracing output to the test-harness writer, filtered by `RUST_LOG`
/// (default `debug` for wlinkd crates, `warn` elsewhere).
///
/// ```ignore
/// #[tokio::test]
/// async fn my_test() {
///     wlinkd_test_utils::tracing_setup::init_test_tracing();
///     tracing::debug!("visible with --nocapture");
/// }
/// ```
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,wlinkd_core=debug,wlinkd_client=debug")),
        )
        .with_test_writer()
        .try_init();
}
