mod bench;
mod cli;
mod config;
mod logging;
mod report;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::Settings;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(params) => {
            let settings = Settings::from_params(&params)?;
            logging::init(settings.log_file.as_deref())?;
            bench::bench(settings)
        }
        Commands::Show(params) => {
            let settings = Settings::from_params(&params)?;
            println!("{}", settings);
            Ok(())
        }
    }
}
