mod cli;
mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};
use crate::commands::ParseArgs;
use crate::config::PlumberConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = if cli.verbose {
        true
    } else {
        logging::env_flag()
    };
    logging::init(verbose);
    match cli.command {
        Command::List { path } => commands::list(&path),
        Command::Downloaded { path } => commands::downloaded(&path),
        Command::Download {
            path,
            selected,
            categories,
            proxy,
            timeout_secs,
        } => commands::download(&path, selected, &categories, proxy, timeout_secs),
        Command::Parse {
            path,
            target,
            no_embedding_filter,
            top_k,
            jobs,
            output,
        } => {
            let mut config = PlumberConfig::from_env()?;
            if let Some(file) = cli.config.as_deref() {
                config.apply_file(file)?;
            }
            commands::parse(
                config,
                ParseArgs {
                    path,
                    target,
                    no_embedding_filter,
                    top_k,
                    jobs,
                    output,
                },
            )
        }
        Command::Version => {
            commands::version();
            Ok(())
        }
    }
}
