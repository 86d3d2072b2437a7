use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "folio=info";

/// Directory holding the daily log files: $XDG_DATA_HOME/folio/logs
pub fn log_dir() -> Result<PathBuf> {
  dirs::data_dir()
    .map(|d| d.join("folio").join("logs"))
    .ok_or_else(|| eyre!("Could not determine data directory"))
}

/// Filter from FOLIO_LOG, then RUST_LOG, then `folio=info`.
fn env_filter() -> EnvFilter {
  EnvFilter::try_from_env("FOLIO_LOG")
    .or_else(|_| EnvFilter::try_from_default_env())
    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// Logs go to a daily rolling file; with `verbose` they are also mirrored to
/// stderr. Keep the returned guard alive until exit so buffered lines are
/// flushed.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
  let dir = log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, "folio.log"));

  let stderr = verbose.then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
  });

  tracing_subscriber::registry()
    .with(env_filter())
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(stderr)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_log_dir_is_under_folio() {
    if let Ok(dir) = log_dir() {
      assert!(dir.ends_with("folio/logs"));
    }
  }

  #[test]
  fn test_default_filter_parses() {
    assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
  }
}
