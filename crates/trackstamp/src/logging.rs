/*!
Logging and profiling setup for the command line.

Log lines go to stderr so the report on stdout stays machine-readable. There are two
implementations behind the same API:

- real: compiled with `feature = "profiling"`. Adds a tracing-chrome layer when
  `ENABLE_PROFILING` is set; the trace file is flushed when the returned guard drops.
- stub: logging only.
*/

/// Default filter when `RUST_LOG` is unset
fn default_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "debug,hyper_util=info,reqwest::connect=info,rustls=info"
    } else {
        "info"
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    use tracing_subscriber::EnvFilter;

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()))
}

#[cfg(feature = "profiling")]
mod inner {
    use tracing_chrome::{ChromeLayerBuilder, FlushGuard};
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    /// Keeps the trace file open; dropping it flushes the trace
    pub struct LoggingGuard {
        _chrome: Option<FlushGuard>,
    }

    pub fn setup_logging_and_profiling() -> LoggingGuard {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(super::env_filter());

        let (chrome_layer, guard) = if std::env::var("ENABLE_PROFILING").is_ok() {
            let (layer, guard) = ChromeLayerBuilder::new().build();
            (Some(layer), Some(guard))
        } else {
            (None, None)
        };

        tracing_subscriber::registry()
            .with(chrome_layer)
            .with(fmt_layer)
            .init();

        if guard.is_some() {
            tracing::info!(
                "Profiling enabled, trace-*.json is written on exit (open it in ui.perfetto.dev)"
            );
        }
        LoggingGuard { _chrome: guard }
    }
}

#[cfg(not(feature = "profiling"))]
mod inner {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    pub struct LoggingGuard;

    pub fn setup_logging_and_profiling() -> LoggingGuard {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(super::env_filter());
        tracing_subscriber::registry().with(fmt_layer).init();

        tracing::debug!("Logging initialized (profiling disabled in this build)");
        LoggingGuard
    }
}

pub use inner::{LoggingGuard, setup_logging_and_profiling};
