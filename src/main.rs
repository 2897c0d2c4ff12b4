// Pear Container
// Command line entry point

use clap::Parser;
use pear_container::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    if let Err(e) = cli::commands::execute(cli.command).await {
        cli::error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
