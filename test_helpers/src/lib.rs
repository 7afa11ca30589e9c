//! Shared helpers for tests: logging bootstrap and scratch directories.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(clippy::explicit_iter_loop, clippy::use_self, clippy::clone_on_ref_ptr)]

use parking_lot::Once;
use tempfile::TempDir;

static LOG_SETUP: Once = Once::new();

/// Enable tracing output for a test, honoring `RUST_LOG` from the
/// environment (or a `.env` file). Safe to call from every test; only the
/// first call installs the subscriber.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Unconditionally install the test subscriber.
pub fn start_logging() {
    dotenvy::dotenv().ok();
    LOG_SETUP.call_once(|| {
        tracing_log::LogTracer::init().ok();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    })
}

/// A scratch directory that is deleted on drop.
pub fn tmp_dir() -> std::io::Result<TempDir> {
    let _ = dotenvy::dotenv();
    tempfile::Builder::new()
        .prefix("pmd_test")
        .tempdir()
}

/// Make a path string out of a scratch dir and a file name.
pub fn tmp_path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}
