use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the process-wide tracing subscriber: `RUST_LOG` controls
/// verbosity, defaulting to `info` for this crate's own modules.
pub fn init() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worknode=info,worknode_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
