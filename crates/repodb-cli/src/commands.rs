use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use repodb::{CollectionOptions, Layout, Query, Record, RepoDb, StoreConfig};
use repodb_store::RemoteStorage;
use serde_json::Value;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = store_config(&cli.target)?;
    match cli.command {
        Command::Check => cmd_check(&config).await,
        Command::Collections => cmd_collections(&config, &cli.format).await,
        Command::Dump(args) => cmd_dump(&config, args, &cli.format).await,
    }
}

fn store_config(target: &TargetArgs) -> anyhow::Result<StoreConfig> {
    let mut config = match &target.config {
        Some(path) => StoreConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(owner) = &target.owner {
        config.owner = owner.clone();
    }
    if let Some(repo) = &target.repo {
        config.repo = repo.clone();
    }
    if let Some(branch) = &target.branch {
        config.branch = branch.clone();
    }
    if let Some(token) = &target.token {
        config.token = Some(token.clone());
    }
    if let Some(base_path) = &target.base_path {
        config.base_path = base_path.clone();
    }
    if let Some(api_url) = &target.api_url {
        config.api_url = api_url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn open(config: &StoreConfig) -> anyhow::Result<(Arc<RemoteStorage>, RepoDb)> {
    let storage = Arc::new(RemoteStorage::from_config(config)?);
    let db = RepoDb::with_engine(storage.clone(), config.base_path.clone());
    Ok((storage, db))
}

async fn cmd_check(config: &StoreConfig) -> anyhow::Result<()> {
    let (storage, _) = open(config)?;
    let head = storage
        .remote()
        .get_ref()
        .await
        .with_context(|| format!("resolving {}/{}@{}", config.owner, config.repo, config.branch))?;
    println!(
        "{} {}/{} reachable",
        "✓".green().bold(),
        config.owner.bold(),
        config.repo.bold()
    );
    println!("  Branch: {} at {}", config.branch.yellow(), short(&head).dimmed());
    println!("  Collections under: {}", config.base_path.cyan());
    Ok(())
}

async fn cmd_collections(config: &StoreConfig, format: &OutputFormat) -> anyhow::Result<()> {
    let (_, db) = open(config)?;
    let found = db.list_collections().await?;
    if *format == OutputFormat::Json {
        let list: Vec<Value> = found
            .iter()
            .map(|c| serde_json::json!({"name": c.name, "layout": c.layout.to_string()}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }
    if found.is_empty() {
        println!("No collections under {}.", config.base_path.cyan());
    }
    for info in found {
        println!("  {} ({})", info.name.bold(), info.layout.to_string().dimmed());
    }
    Ok(())
}

async fn cmd_dump(config: &StoreConfig, args: DumpArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let (_, db) = open(config)?;
    let query = build_query(&args)?;
    let layout = if args.sharded { Layout::Sharded } else { Layout::SingleBlob };
    let mut collection = db.collection_with(&args.name, CollectionOptions::new().with_layout(layout));
    let records = collection.find(&query).await?;

    if *format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    println!(
        "{} {} ({}, {} records)",
        "Collection".bold(),
        args.name.yellow(),
        layout,
        records.len()
    );
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn build_query(args: &DumpArgs) -> anyhow::Result<Query> {
    let mut query = match &args.criteria {
        Some(raw) => {
            let criteria: Value = serde_json::from_str(raw).context("parsing --where")?;
            Query::from_criteria(&criteria)?
        }
        None => Query::new(),
    };
    for key in &args.sort {
        query = match key.strip_prefix('-') {
            Some("") => bail!("empty sort key"),
            Some(field) => query.desc(field),
            None => query.asc(key.as_str()),
        };
    }
    if let Some(offset) = args.offset {
        query = query.offset(offset);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    Ok(query)
}

fn print_record(record: &Record) {
    let id = record
        .get("id")
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "-".into());
    println!("  {}", id.yellow());
    for (field, value) in record {
        if field == "id" {
            continue;
        }
        println!("    {}: {}", field.cyan(), value);
    }
}

fn short(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn dump_args(argv: &[&str]) -> DumpArgs {
        let mut full = vec!["repodb", "dump"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Dump(args) => args,
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn flags_override_defaults() {
        let target = TargetArgs {
            owner: Some("acme".into()),
            repo: Some("inv".into()),
            branch: Some("data".into()),
            ..TargetArgs::default()
        };
        let config = store_config(&target).unwrap();
        assert_eq!(config.branch, "data");
        assert_eq!(config.base_path, "data");
    }

    #[test]
    fn missing_repo_is_an_error() {
        let target = TargetArgs {
            owner: Some("acme".into()),
            ..TargetArgs::default()
        };
        assert!(store_config(&target).is_err());
    }

    #[test]
    fn query_from_flags() {
        let args = dump_args(&["users", "--where", r#"{"age": {"$gte": 18}}"#, "--sort", "-age", "-n", "2"]);
        let query = build_query(&args).unwrap();
        assert_eq!(query.filters().len(), 1);
        assert!(build_query(&dump_args(&["users", "--where", "not json"])).is_err());
        assert!(build_query(&dump_args(&["users", "--sort", "-"])).is_err());
    }

    #[test]
    fn short_sha() {
        assert_eq!(short("3b18e512dba79e4c"), "3b18e512");
        assert_eq!(short("abc"), "abc");
    }
}
