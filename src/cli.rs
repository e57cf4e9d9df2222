//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Search indexers, pick the best release, and track it through a download client.
#[derive(Parser, Debug)]
#[command(name = "acquirer")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/acquirer/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler (wanted-list search and download sync) until Ctrl-C
    Run,

    /// Run a waterfall search and print ranked results
    Search(SearchArgs),

    /// Check connectivity of every configured indexer and client
    Test,

    /// Run one download sync pass
    Sync,

    /// Validate the config file and print a summary
    CheckConfig,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SearchArgs {
    /// Title to search for
    pub title: String,

    /// Author, tried together with the title first
    #[arg(short, long)]
    pub author: Option<String>,

    /// ISBN, tried last on its own
    #[arg(long)]
    pub isbn: Option<String>,

    /// Search for audiobooks instead of ebooks
    #[arg(long)]
    pub audiobook: bool,

    /// Maximum number of ranked results to print
    #[arg(
        short = 'n',
        long,
        default_value_t = 20,
        value_parser = clap::value_parser!(u16).range(1..=500)
    )]
    pub limit: u16,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_subcommand() {
        let err = Args::try_parse_from(["acquirer"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_cli_verbose_flag_counts_after_subcommand() {
        let args = Args::try_parse_from(["acquirer", "sync", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert!(matches!(args.command, Command::Sync));
    }

    #[test]
    fn test_cli_global_config_path() {
        let args = Args::try_parse_from(["acquirer", "--config", "/tmp/a.toml", "test"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/a.toml")));
        assert!(matches!(args.command, Command::Test));
    }

    #[test]
    fn test_cli_search_args() {
        let args = Args::try_parse_from([
            "acquirer",
            "search",
            "Dune",
            "--author",
            "Frank Herbert",
            "--isbn",
            "9780441013593",
            "--audiobook",
        ])
        .unwrap();
        let Command::Search(search) = args.command else {
            panic!("expected search subcommand");
        };
        assert_eq!(search.title, "Dune");
        assert_eq!(search.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(search.isbn.as_deref(), Some("9780441013593"));
        assert!(search.audiobook);
        assert_eq!(search.limit, 20);
    }

    #[test]
    fn test_cli_search_limit_zero_rejected() {
        let err = Args::try_parse_from(["acquirer", "search", "Dune", "-n", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_check_config_is_kebab_case() {
        let args = Args::try_parse_from(["acquirer", "check-config", "-q"]).unwrap();
        assert!(args.quiet);
        assert!(matches!(args.command, Command::CheckConfig));
    }
}
