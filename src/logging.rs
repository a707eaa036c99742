use env_logger::Env;

/// Logs always go to stderr: `serve` owns stdout for protocol events.
pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .try_init();
}
