//! Miscellaneous test code for Quagga.
// Standard lints
#![warn(missing_docs)]
#![deny(clippy::await_holding_lock)]
#![forbid(unsafe_code)]

use std::sync::Once;

use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Initialize globals for tests such as the tracing subscriber and panic / error
/// reporting hooks
pub fn init() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer().with_target(false);
        // Use the RUST_LOG env var, or by default:
        //  - warn for most tests, and
        //  - for the lease and bridge modules, show the info logs that tests assert on
        let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new("warn")
                .unwrap()
                .add_directive("quagga_compute=info".parse().unwrap())
                .add_directive("quagga_job_queue=info".parse().unwrap())
        });

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(ErrorLayer::default())
            .init();

        color_eyre::config::HookBuilder::default()
            .install()
            .expect("failed to install color-eyre hooks");
    })
}
