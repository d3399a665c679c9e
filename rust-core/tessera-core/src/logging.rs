//! # Logging
//!
//! Structured JSON logging through `tracing-subscriber`.

use tracing_subscriber::filter::{Directive, EnvFilter};

/// Install the global JSON subscriber
///
/// `RUST_LOG` takes precedence; `default_directive` (e.g. `"tessera_core=info"`)
/// is added on top. Calling this more than once is harmless.
pub fn init_tracing(default_directive: &str) {
    let mut filter = EnvFilter::from_default_env();
    match default_directive.parse::<Directive>() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(err) => eprintln!("invalid log directive {default_directive:?}: {err}"),
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}
