use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Context};
use colored::Colorize;
use lf_engine::{
    FusionConfig, FusionEngine, FusionRuntime, IdentityMode, JsonLinesAdapter, RunSummary,
    SourceConfig, SourceOutcome,
};
use lf_store::durable::JOURNAL_FILE;
use lf_store::{DurableLedgerStore, InMemoryLedgerStore, LedgerReader, LedgerStore, WalConfig};
use lf_types::{AccountId, SourceId};
use lf_verify::BalanceVerifier;
use serde_json::json;
use tracing::warn;

use crate::cli::{BalancesArgs, Cli, Command, OutputFormat, RunArgs, VerifyArgs};

pub fn run_command(cli: Cli) -> anyhow::Result<ExitCode> {
    let format = cli.format;
    match cli.command {
        Command::Run(args) => cmd_run(args, format),
        Command::Verify(args) => cmd_verify(args, format),
        Command::Balances(args) => cmd_balances(args, format),
    }
}

/// Merge the config file, flag overrides and `--source` arguments.
fn load_config(args: &RunArgs) -> anyhow::Result<FusionConfig> {
    let mut config = match &args.config {
        Some(path) => FusionConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => FusionConfig::default(),
    };
    if let Some(window) = args.lateness_window {
        config.lateness_window = window;
    }
    if let Some(tolerance) = args.balance_tolerance {
        config.balance_tolerance = tolerance;
    }
    if let Some(store) = &args.store {
        config.store.path = Some(store.clone());
    }
    config.sources.extend(args.sources.iter().map(|spec| SourceConfig {
        id: SourceId::new(spec.id.as_str()),
        path: spec.path.clone(),
        identity: IdentityMode::Declared,
    }));
    config.validate()?;
    if config.sources.is_empty() {
        bail!("no sources given; pass --source ID=PATH or list [[sources]] in the config file");
    }
    Ok(config)
}

fn cmd_run(args: RunArgs, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let config = load_config(&args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let summary = runtime.block_on(async {
        match config.store.path.clone() {
            Some(dir) => {
                let store = DurableLedgerStore::open(
                    &dir,
                    WalConfig {
                        sync_mode: config.store.sync,
                    },
                )
                .with_context(|| format!("failed to open ledger store {}", dir.display()))?;
                fuse(store, config).await
            }
            None => fuse(InMemoryLedgerStore::new(), config).await,
        }
    })?;

    print_summary(&summary, format)?;
    Ok(if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn fuse<S: LedgerStore + 'static>(store: S, config: FusionConfig) -> anyhow::Result<RunSummary> {
    let sources = config.sources.clone();
    let engine = FusionEngine::new(store, config)?;
    let mut runtime = FusionRuntime::new(engine);
    for source in &sources {
        let adapter = JsonLinesAdapter::open(source.id.clone(), &source.path)
            .await
            .with_context(|| format!("source {}", source.id))?;
        runtime.add_source(Box::new(adapter), source.identity)?;
    }

    let trigger = runtime.shutdown_trigger();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, draining sources");
            trigger.trigger();
        }
    });

    let (summary, _engine) = runtime.run().await?;
    Ok(summary)
}

fn outcome_label(outcome: &SourceOutcome) -> String {
    match outcome {
        SourceOutcome::Closed => "closed".into(),
        SourceOutcome::Interrupted => "interrupted".into(),
        SourceOutcome::Failed { reason } => format!("failed: {reason}"),
        SourceOutcome::Aborted { reason } => format!("aborted: {reason}"),
    }
}

fn print_summary(summary: &RunSummary, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let sources: serde_json::Map<String, serde_json::Value> = summary
                .sources
                .iter()
                .map(|(id, outcome)| (id.to_string(), json!(outcome_label(outcome))))
                .collect();
            let faults: Vec<String> = summary.faults.iter().map(|f| f.to_string()).collect();
            let out = json!({
                "clean": summary.is_clean(),
                "stats": summary.stats,
                "balances": summary.balances,
                "sources": sources,
                "faults": faults,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            let stats = &summary.stats;
            let mark = if summary.is_clean() {
                "✓".green().bold()
            } else {
                "✗".red().bold()
            };
            println!(
                "{} Finalized {} records from {} sources",
                mark,
                stats.finalized,
                summary.sources.len()
            );
            println!(
                "  {} duplicates, {} conflicts, {} amendments, {} late, {} rejected",
                stats.duplicates, stats.conflicts, stats.amendments, stats.late_arrivals, stats.rejected
            );
            for (id, outcome) in &summary.sources {
                let label = outcome_label(outcome);
                let label = if outcome.is_failure() {
                    label.red()
                } else {
                    label.normal()
                };
                println!("  {} {}: {}", "Source".bold(), id, label);
            }
            for (account, balance) in &summary.balances {
                println!("  {} {}: {}", "Balance".bold(), account, balance);
            }
            for fault in &summary.faults {
                println!("  {} {}", "Unverified".red().bold(), fault);
            }
            if summary.total_source_failure() {
                println!("  {}", "every source failed".red().bold());
            }
        }
    }
    Ok(())
}

/// Open an existing ledger store without creating one.
fn open_existing(dir: &Path) -> anyhow::Result<DurableLedgerStore> {
    if !dir.join(JOURNAL_FILE).exists() {
        bail!("no ledger store at {}", dir.display());
    }
    DurableLedgerStore::open(dir, WalConfig::default())
        .with_context(|| format!("failed to open ledger store {}", dir.display()))
}

fn cmd_verify(args: VerifyArgs, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let store = open_existing(&args.store)?;
    let recovery = BalanceVerifier::recover(&store, args.balance_tolerance)?;
    let verifier = &recovery.verifier;

    match format {
        OutputFormat::Json => {
            let accounts: Vec<_> = verifier
                .accounts()
                .map(|account| {
                    json!({
                        "account": account,
                        "balance": verifier.balance(account),
                        "verified": verifier.status(account).is_verified(),
                    })
                })
                .collect();
            let faults: Vec<String> = recovery.faults.iter().map(|f| f.to_string()).collect();
            let out = json!({
                "entries": store.len()?,
                "checkpoint_seq": recovery.checkpoint_seq,
                "tail_len": recovery.tail_len,
                "accounts": accounts,
                "faults": faults,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!(
                "{} {} entries, checkpoint #{} + {} journal records",
                "Ledger:".bold(),
                store.len()?,
                recovery.checkpoint_seq,
                recovery.tail_len
            );
            for account in verifier.accounts() {
                let mark = if verifier.status(account).is_verified() {
                    "✓".green().bold()
                } else {
                    "✗".red().bold()
                };
                println!("  {} {}: {}", mark, account, verifier.balance(account));
            }
            for fault in &recovery.faults {
                println!("  {} {}", "Fault".red().bold(), fault);
            }
            if recovery.faults.is_empty() {
                println!("{} All balances reconcile", "✓".green().bold());
            }
        }
    }

    Ok(if recovery.faults.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_balances(args: BalancesArgs, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let store = open_existing(&args.store)?;
    let balances = match &args.account {
        Some(account) => {
            let account = AccountId::new(account.as_str());
            let balance = store.snapshot(&account)?;
            std::iter::once((account, balance)).collect()
        }
        None => store.snapshots()?,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&balances)?),
        OutputFormat::Text => {
            if balances.is_empty() {
                println!("No accounts.");
            }
            for (account, balance) in &balances {
                println!("{}: {}", account.to_string().bold(), balance);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::SourceSpec;
    use lf_types::Decimal;
    use std::io::Write;
    use std::path::PathBuf;

    fn run_args(sources: Vec<SourceSpec>, store: Option<PathBuf>) -> RunArgs {
        RunArgs {
            sources,
            config: None,
            store,
            lateness_window: None,
            balance_tolerance: None,
        }
    }

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut file = std::fs::File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    #[test]
    fn config_file_and_flags_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("fusion.toml");
        std::fs::write(
            &config,
            r#"
lateness_window = 10
balance_tolerance = "0.01"

[[sources]]
id = "bank"
path = "bank.jsonl"
identity = "content"
"#,
        )
        .unwrap();

        let mut args = run_args(
            vec![SourceSpec {
                id: "card".into(),
                path: "card.jsonl".into(),
            }],
            Some(dir.path().join("ledger")),
        );
        args.config = Some(config);
        args.lateness_window = Some(25);

        let config = load_config(&args).unwrap();
        assert_eq!(config.lateness_window, 25);
        assert_eq!(config.balance_tolerance, Decimal::new(1, 2));
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].identity, IdentityMode::Content);
        assert_eq!(config.sources[1].id, SourceId::new("card"));
        assert_eq!(config.store.path, Some(dir.path().join("ledger")));
    }

    #[test]
    fn run_without_sources_is_an_error() {
        assert!(load_config(&run_args(vec![], None)).is_err());
    }

    #[test]
    fn duplicate_source_ids_are_an_error() {
        let spec = SourceSpec {
            id: "bank".into(),
            path: "a.jsonl".into(),
        };
        assert!(load_config(&run_args(vec![spec.clone(), spec], None)).is_err());
    }

    #[test]
    fn run_then_verify_and_list_balances() {
        let dir = tempfile::tempdir().unwrap();
        let bank = dir.path().join("bank.jsonl");
        write_lines(
            &bank,
            &[
                r#"{"identity":"b-1","timestamp":100,"account":"checking","amount":"250.00","direction":"credit","currency":"USD"}"#,
                r#"{"identity":"b-2","timestamp":200,"account":"checking","amount":"50.00","direction":"debit","currency":"USD"}"#,
            ],
        );
        let store = dir.path().join("ledger");
        let args = run_args(
            vec![SourceSpec {
                id: "bank".into(),
                path: bank,
            }],
            Some(store.clone()),
        );

        assert_eq!(cmd_run(args, OutputFormat::Json).unwrap(), ExitCode::SUCCESS);

        let verify = VerifyArgs {
            store: store.clone(),
            balance_tolerance: Decimal::ZERO,
        };
        assert_eq!(cmd_verify(verify, OutputFormat::Text).unwrap(), ExitCode::SUCCESS);

        let reopened = open_existing(&store).unwrap();
        assert_eq!(
            reopened.snapshot(&AccountId::new("checking")).unwrap(),
            Decimal::new(200, 0)
        );
        drop(reopened);

        let balances = BalancesArgs {
            store,
            account: Some("checking".into()),
        };
        assert_eq!(cmd_balances(balances, OutputFormat::Text).unwrap(), ExitCode::SUCCESS);
    }

    #[test]
    fn run_with_only_a_missing_source_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let args = run_args(
            vec![SourceSpec {
                id: "bank".into(),
                path: dir.path().join("missing.jsonl"),
            }],
            None,
        );
        assert!(cmd_run(args, OutputFormat::Text).is_err());
    }

    #[test]
    fn verify_refuses_a_directory_without_a_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let args = VerifyArgs {
            store: dir.path().to_path_buf(),
            balance_tolerance: Decimal::ZERO,
        };
        assert!(cmd_verify(args, OutputFormat::Text).is_err());
    }
}
