use clap::Parser;
use serde_json::Value;
use tracing::error;
use trustbridge_cli::cli::Cli;
use trustbridge_cli::output::{ErrorCode, ResultBuilder, print_result};
use trustbridge_cli::{commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let name = cli.command.name();
	let builder = ResultBuilder::<Value>::new(name);
	match commands::dispatch(cli.command, cli.config.as_deref()).await {
		Ok(data) => print_result(&builder.data(data).build()),
		Err(err) => {
			error!(target = "tbridge", error = %format!("{err:#}"), "command failed");
			print_result(&builder.error(ErrorCode::for_error(&err), format!("{err:#}")).build());
			std::process::exit(1);
		}
	}
}
