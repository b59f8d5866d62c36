use clap::Parser;
use devmon_cli::{cli::Cli, logging, monitor};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose, cli.quiet);

	let config = match cli.resolve_config() {
		Ok(config) => config,
		Err(err) => {
			eprintln!("error: {err:#}");
			std::process::exit(2);
		}
	};

	let code = match monitor::run(config).await {
		Ok(code) => code,
		Err(err) => {
			tracing::error!(target = "devmon", error = %format!("{err:#}"), "monitor failed");
			1
		}
	};
	std::process::exit(code);
}
