use std::env::var;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable selecting the output format.
const FORMAT_ENV: &str = "RUST_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Anything other than `json` (case-insensitive) is compact.
    pub fn from_env() -> Self {
        match var(FORMAT_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

pub fn init() {
    init_with_level(LevelFilter::INFO);
}

/// Install the global subscriber. `RUST_LOG` overrides `level`.
///
/// A second call is a no-op, so tests may call this freely.
pub fn init_with_level(level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();
    let format = LogFormat::from_env();

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    if tracing_subscriber::registry().with(log_layer).try_init().is_ok() {
        tracing::debug!(?format, "Tracing initialized");
    }
}
