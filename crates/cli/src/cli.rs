use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "paperplumber",
    version,
    about = "Collect scientific papers and extract quantities from their PDFs"
)]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    /// TOML file overriding environment settings.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the papers found by the last search.
    List { path: PathBuf },
    /// List the downloaded PDFs.
    Downloaded { path: PathBuf },
    /// Download full texts for the search results.
    Download {
        path: PathBuf,
        /// Only papers marked as selected.
        #[arg(short = 's', long = "selected", action = ArgAction::SetTrue)]
        selected: bool,
        /// Category filter `<facet>:<term_a>,<term_b>`; repeatable.
        #[arg(short = 'c', long = "categories")]
        categories: Vec<String>,
        #[arg(short = 'x', long)]
        proxy: Option<String>,
        #[arg(long = "timeout-secs")]
        timeout_secs: Option<u64>,
    },
    /// Extract a named quantity from every downloaded paper.
    Parse {
        path: PathBuf,
        target: String,
        /// Ask the model about every page instead of the closest ones.
        #[arg(long = "no-embedding-filter", action = ArgAction::SetTrue)]
        no_embedding_filter: bool,
        #[arg(long = "top-k")]
        top_k: Option<usize>,
        #[arg(long)]
        jobs: Option<usize>,
        /// Defaults to `<path>/output.json`.
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_flags() {
        let cli = Cli::parse_from([
            "paperplumber",
            "--verbose",
            "parse",
            "lib",
            "coherence time",
            "--top-k",
            "3",
            "--no-embedding-filter",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::Parse {
                target,
                top_k,
                no_embedding_filter,
                output,
                ..
            } => {
                assert_eq!(target, "coherence time");
                assert_eq!(top_k, Some(3));
                assert!(no_embedding_filter);
                assert!(output.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn categories_repeat() {
        let cli = Cli::parse_from([
            "paperplumber",
            "download",
            "lib",
            "-c",
            "Contribution:Tool",
            "-c",
            "Type:Book",
        ]);
        match cli.command {
            Command::Download { categories, .. } => assert_eq!(categories.len(), 2),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
