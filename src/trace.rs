use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber.
///
/// `levels` uses the `RUST_LOG` directive syntax, e.g.
/// `info,adx_metrics_sink=debug`.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|_| EnvFilter::new("info"));

    // Ignore errors when setting, since tests can initialize this
    // multiple times.
    let _ = if json {
        fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .try_init()
    } else {
        fmt().with_ansi(color).with_env_filter(filter).try_init()
    };
}
