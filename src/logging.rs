use env_logger::{Env, Target};

/// Log to stderr; stdout carries tick output. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .format_timestamp_millis()
        .init();
}
