//! `tracing` subscriber setup. Every lifecycle event the original
//! prints to `std::cout`/`std::cerr` (device added/removed,
//! programming outcome, client connect/disconnect, protocol
//! violations) is a structured `tracing` event instead.

use tracing_subscriber::EnvFilter;

/// `filter_override` wins over `RUST_LOG`, which wins over `info`.
pub fn init(filter_override: Option<&str>) {
    let filter = match filter_override {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
