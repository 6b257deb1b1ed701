mod cli;
mod logging;

use anyhow::Result;
use clap::Parser;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	tabrelay::run_relay_server(cli.relay_config()).await
}
