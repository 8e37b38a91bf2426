use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Output format of log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human readable, one line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Initialize tracing
///
/// `RUST_LOG` takes precedence over `log_level` when it is set.
pub fn init(log_level: &str, format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    let json = (format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json());
    let compact = (format == LogFormat::Compact).then(|| tracing_subscriber::fmt::layer().compact());

    let collector = Registry::default().with(json).with(compact).with(env_filter);

    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}
