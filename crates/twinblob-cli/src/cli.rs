use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "twinblob",
    about = "TwinBlob: replicated content-addressed blob storage",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a configuration file and show the resolved settings
    CheckConfig(CheckConfigArgs),
    /// Inspect or maintain an obligation journal
    Journal(JournalArgs),
}

#[derive(Args)]
pub struct CheckConfigArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct JournalArgs {
    #[command(subcommand)]
    pub action: JournalAction,
}

#[derive(Subcommand)]
pub enum JournalAction {
    /// List pending obligations
    Inspect {
        path: PathBuf,
        /// Show at most this many obligations
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Rewrite the log so it holds only pending obligations
    Compact { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_check_config() {
        let cli = Cli::try_parse_from(["twinblob", "check-config", "twinblob.toml"]).unwrap();
        match cli.command {
            Command::CheckConfig(args) => assert_eq!(args.file, PathBuf::from("twinblob.toml")),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn parse_journal_inspect_with_limit() {
        let cli = Cli::try_parse_from(["twinblob", "journal", "inspect", "ob.wal", "--limit", "5"]).unwrap();
        match cli.command {
            Command::Journal(JournalArgs { action: JournalAction::Inspect { path, limit } }) => {
                assert_eq!(path, PathBuf::from("ob.wal"));
                assert_eq!(limit, Some(5));
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn parse_journal_compact() {
        let cli = Cli::try_parse_from(["twinblob", "journal", "compact", "ob.wal"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Journal(JournalArgs { action: JournalAction::Compact { .. } })
        ));
    }

    #[test]
    fn parse_json_format_after_subcommand() {
        let cli = Cli::try_parse_from(["twinblob", "check-config", "a.toml", "--format", "json"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["twinblob", "-v", "journal", "compact", "ob.wal"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(Cli::try_parse_from(["twinblob", "journal", "inspect"]).is_err());
    }
}
