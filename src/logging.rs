use env_logger::Env;

/// Installs the `env_logger` backend for the `log` facade. `RUST_LOG`
/// overrides the default `info` filter. Safe to call more than once.
pub fn init() {
    init_with_default("info");
}

pub fn init_with_default(default_filter: &str) {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}
