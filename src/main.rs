use clap::Parser;
use color_eyre::Result;
use tracing::info;

use folio::cli::{self, Cli};
use folio::config::Config;
use folio::logging;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let cli = Cli::parse();

  let _guard = logging::init(cli.verbose)?;

  // Load configuration
  let config = Config::load(cli.config.as_deref())?;
  info!(server = %config.server.url, backend = ?config.cache.backend, "Starting folio");

  cli::run(cli, config).await
}
