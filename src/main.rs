mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    webtest::logger::init_logger(&cli.verbosity);

    match cli.command {
        Commands::Run(args) => {
            if !cli::run(args).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Show { files } => cli::show(&files)?,
        Commands::Resolve { file, vars } => cli::resolve(&file, &vars)?,
    }
    Ok(ExitCode::SUCCESS)
}
