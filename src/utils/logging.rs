use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "yt_batch_downloader=info";

/// Install the global fmt subscriber. `level` overrides the crate's level
/// when `RUST_LOG` is absent; repeated calls are ignored.
pub fn init_tracing(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match level {
        Some(level) => EnvFilter::new(format!("yt_batch_downloader={}", level)),
        None => EnvFilter::new(DEFAULT_LOG_FILTER),
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
