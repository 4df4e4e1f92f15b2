use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lf_types::Decimal;

#[derive(Parser)]
#[command(
    name = "ledgerfusion",
    about = "LedgerFusion: fuse transaction streams from many sources into one verified ledger",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log every record state transition
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fuse sources into the ledger until they are exhausted
    Run(RunArgs),
    /// Rebuild balances from a ledger store and cross-check them
    Verify(VerifyArgs),
    /// Show account balances held by a ledger store
    Balances(BalancesArgs),
}

/// A `--source ID=PATH` argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSpec {
    pub id: String,
    pub path: PathBuf,
}

fn parse_source(s: &str) -> Result<SourceSpec, String> {
    match s.split_once('=') {
        Some((id, path)) if !id.trim().is_empty() && !path.is_empty() => Ok(SourceSpec {
            id: id.trim().to_string(),
            path: PathBuf::from(path),
        }),
        _ => Err(format!("expected ID=PATH, got `{s}`")),
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// JSON-lines source as ID=PATH; repeat for more sources
    #[arg(long = "source", value_name = "ID=PATH", value_parser = parse_source)]
    pub sources: Vec<SourceSpec>,
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Ledger store directory; the ledger stays in memory without one
    #[arg(long)]
    pub store: Option<PathBuf>,
    #[arg(long)]
    pub lateness_window: Option<u64>,
    #[arg(long)]
    pub balance_tolerance: Option<Decimal>,
}

#[derive(Args)]
pub struct VerifyArgs {
    #[arg(long)]
    pub store: PathBuf,
    #[arg(long, default_value = "0")]
    pub balance_tolerance: Decimal,
}

#[derive(Args)]
pub struct BalancesArgs {
    #[arg(long)]
    pub store: PathBuf,
    /// Only show this account
    #[arg(long)]
    pub account: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_sources() {
        let cli = Cli::try_parse_from([
            "ledgerfusion",
            "run",
            "--source",
            "bank=bank.jsonl",
            "--source",
            "card=/data/card.jsonl",
            "--lateness-window",
            "250",
        ])
        .unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.sources.len(), 2);
            assert_eq!(args.sources[1].id, "card");
            assert_eq!(args.sources[1].path, PathBuf::from("/data/card.jsonl"));
            assert_eq!(args.lateness_window, Some(250));
            assert!(args.store.is_none());
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_run_with_config_and_store() {
        let cli = Cli::try_parse_from([
            "ledgerfusion",
            "run",
            "--config",
            "fusion.toml",
            "--store",
            "ledger",
            "--balance-tolerance",
            "0.01",
        ])
        .unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.config, Some(PathBuf::from("fusion.toml")));
            assert_eq!(args.store, Some(PathBuf::from("ledger")));
            assert_eq!(args.balance_tolerance, Some(Decimal::new(1, 2)));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn malformed_source_is_rejected() {
        assert!(Cli::try_parse_from(["ledgerfusion", "run", "--source", "bank.jsonl"]).is_err());
        assert!(Cli::try_parse_from(["ledgerfusion", "run", "--source", "=x"]).is_err());
    }

    #[test]
    fn parse_verify() {
        let cli = Cli::try_parse_from(["ledgerfusion", "verify", "--store", "ledger"]).unwrap();
        if let Command::Verify(args) = cli.command {
            assert_eq!(args.store, PathBuf::from("ledger"));
            assert_eq!(args.balance_tolerance, Decimal::ZERO);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_balances_for_one_account() {
        let cli = Cli::try_parse_from([
            "ledgerfusion",
            "balances",
            "--store",
            "ledger",
            "--account",
            "checking",
        ])
        .unwrap();
        if let Command::Balances(args) = cli.command {
            assert_eq!(args.account, Some("checking".into()));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["ledgerfusion", "--verbose", "verify", "--store", "x"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["ledgerfusion", "--format", "json", "balances", "--store", "x"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}
