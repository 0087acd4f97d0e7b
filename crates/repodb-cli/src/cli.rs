use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "repodb",
    about = "Inspect record collections stored in a hosted Git repository",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Where the records live. Flags override values from `--config`.
#[derive(Args, Clone, Debug, Default)]
pub struct TargetArgs {
    /// TOML file with store settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true)]
    pub owner: Option<String>,
    #[arg(long, global = true)]
    pub repo: Option<String>,
    #[arg(long, global = true)]
    pub branch: Option<String>,
    /// Access token for the repository API
    #[arg(long, global = true)]
    pub token: Option<String>,
    /// Directory holding the collections
    #[arg(long, global = true)]
    pub base_path: Option<String>,
    #[arg(long, global = true)]
    pub api_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check that the repository and branch are reachable
    Check,
    /// List collections under the base path
    Collections,
    /// Print the records of one collection
    Dump(DumpArgs),
}

#[derive(Args)]
pub struct DumpArgs {
    pub name: String,
    /// One file per record instead of one file per collection
    #[arg(long)]
    pub sharded: bool,
    /// Criteria as JSON, e.g. '{"age": {"$gte": 18}}'
    #[arg(long = "where")]
    pub criteria: Option<String>,
    /// Sort key; prefix with '-' for descending. Repeatable.
    #[arg(long, allow_hyphen_values = true)]
    pub sort: Vec<String>,
    #[arg(long)]
    pub offset: Option<usize>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_check() {
        let cli = Cli::try_parse_from(["repodb", "check", "--owner", "acme", "--repo", "inv"]).unwrap();
        assert!(matches!(cli.command, Command::Check));
        assert_eq!(cli.target.owner, Some("acme".into()));
        assert_eq!(cli.target.repo, Some("inv".into()));
    }

    #[test]
    fn parse_collections_with_config() {
        let cli = Cli::try_parse_from(["repodb", "--config", "repodb.toml", "collections"]).unwrap();
        assert!(matches!(cli.command, Command::Collections));
        assert_eq!(cli.target.config, Some(PathBuf::from("repodb.toml")));
    }

    #[test]
    fn parse_dump() {
        let cli = Cli::try_parse_from([
            "repodb", "dump", "users", "--sharded", "--where", r#"{"role":"admin"}"#,
            "--sort", "-age", "--sort", "name", "-n", "5", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        if let Command::Dump(args) = cli.command {
            assert_eq!(args.name, "users");
            assert!(args.sharded);
            assert_eq!(args.criteria.as_deref(), Some(r#"{"role":"admin"}"#));
            assert_eq!(args.sort, vec!["-age", "name"]);
            assert_eq!(args.limit, Some(5));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn dump_requires_name() {
        assert!(Cli::try_parse_from(["repodb", "dump"]).is_err());
    }
}
