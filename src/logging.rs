//! Tracing subscriber setup shared by the binaries.

use std::fs;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LogArgs;
use crate::error::{Error, Result};

const LOG_FILE: &str = "notionsearch.log";

fn compact_output(github_actions: Option<&str>) -> bool {
    github_actions.is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `--log-level`. Under GitHub Actions the stderr format
/// drops timestamps and targets. With `--log-dir` a daily-rolling file is
/// written as well; keep the returned guard alive until exit so buffered
/// lines are flushed.
pub fn init(args: &LogArgs) -> Result<Option<WorkerGuard>> {
    let compact = compact_output(std::env::var("GITHUB_ACTIONS").ok().as_deref());
    let stderr = if compact {
        fmt::layer()
            .compact()
            .without_time()
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        vec![stderr.with_filter(filter(&args.log_level)).boxed()];
    let mut guard = None;
    if let Some(dir) = &args.log_dir {
        fs::create_dir_all(dir).map_err(|err| {
            Error::Config(format!("cannot create log directory {}: {err}", dir.display()))
        })?;
        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE));
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter(&args.log_level))
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|err| Error::Config(format!("logging already initialised: {err}")))?;
    Ok(guard)
}
