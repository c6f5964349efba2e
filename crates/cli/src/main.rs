use clap::Parser;
use tracing::error;

mod cli;
mod commands;
mod logging;

use cli::Cli;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		error!(target = "lcc", error = %err, "command failed");
		std::process::exit(1);
	}
}
