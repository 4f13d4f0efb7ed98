use clap::Parser;
use rbridge_cli::{cli::Cli, commands, logging};

fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let code = match rbridge_cli::runtime() {
		Ok(rt) => rt.block_on(commands::dispatch(cli)),
		Err(err) => {
			eprintln!("failed to start async runtime: {err}");
			1
		}
	};
	std::process::exit(code);
}
