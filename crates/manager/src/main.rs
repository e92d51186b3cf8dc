mod config;
mod deploy;
mod error;
mod serve;

use clap::Parser;
use config::{Cli, Command};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("aim_manager={log_level},aim_reconciler={log_level}")));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Command::Deploy(args) => deploy::run(&cli, args).await,
        Command::Serve(args) => serve::run(&cli, args).await,
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "aim-manager exiting with error");
        std::process::exit(err.exit_code());
    }

    Ok(())
}
