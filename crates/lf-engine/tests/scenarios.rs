//! End-to-end fusion scenarios.

use std::collections::BTreeMap;
use std::io::Write;

use lf_engine::{
    FusionConfig, FusionEngine, FusionEvent, FusionRuntime, IdentityMode, JsonLinesAdapter,
    SourceOutcome,
};
use lf_index::DedupDecision;
use lf_store::{DurableLedgerStore, InMemoryLedgerStore, LedgerReader, WalConfig};
use lf_types::{AccountId, Decimal, SourceId, Timestamp, TransactionId, TransactionRecord};
use lf_verify::BalanceVerifier;
use proptest::prelude::*;

fn engine(sources: &[&str], lateness: u64) -> FusionEngine<InMemoryLedgerStore> {
    let config = FusionConfig {
        lateness_window: lateness,
        ..FusionConfig::default()
    };
    let mut engine = FusionEngine::new(InMemoryLedgerStore::new(), config).unwrap();
    for s in sources {
        engine
            .register_source(SourceId::new(*s), IdentityMode::Declared)
            .unwrap();
    }
    engine
}

fn record(id: &str, ts: u64, cents: i64, source: &str) -> TransactionRecord {
    let amount = Decimal::new(cents.abs(), 2);
    let record = if cents >= 0 {
        TransactionRecord::credit(id, ts, "A", amount, "USD")
    } else {
        TransactionRecord::debit(id, ts, "A", amount, "USD")
    };
    record.with_source(source)
}

fn account() -> AccountId {
    AccountId::new("A")
}

fn close_all(engine: &mut FusionEngine<InMemoryLedgerStore>, sources: &[&str]) {
    for s in sources {
        engine.close_source(&SourceId::new(*s)).unwrap();
    }
}

#[test]
fn out_of_order_sources_finalize_in_timestamp_order() {
    let sources = ["S1", "S2", "S3"];
    let mut engine = engine(&sources, 2);
    engine.ingest(record("t12", 12, 300, "S1")).unwrap();
    engine.ingest(record("t10", 10, 500, "S2")).unwrap();
    engine.ingest(record("t11", 11, -200, "S3")).unwrap();
    close_all(&mut engine, &sources);

    let order: Vec<u64> = engine
        .store()
        .entries()
        .unwrap()
        .iter()
        .map(|e| e.record.timestamp.ticks())
        .collect();
    assert_eq!(order, vec![10, 11, 12]);
    assert_eq!(engine.balance(&account()), Decimal::new(600, 2));
}

#[test]
fn identical_resubmission_leaves_the_store_unchanged() {
    let mut engine = engine(&["S"], 0);
    engine.ingest(record("X", 5, 1000, "S")).unwrap();
    engine
        .advance_watermark(&SourceId::new("S"), Timestamp::new(6))
        .unwrap();
    let before = engine.store().len().unwrap();

    let decision = engine.ingest(record("X", 5, 1000, "S")).unwrap();
    assert!(matches!(decision, DedupDecision::RejectedDuplicate { .. }));
    assert_eq!(engine.store().len().unwrap(), before);
}

#[test]
fn conflicting_sources_resolve_to_the_later_record() {
    let sources = ["S1", "S2"];
    let mut engine = engine(&sources, 1);
    engine.ingest(record("X", 10, 10_000, "S1")).unwrap();
    engine.ingest(record("X", 11, 15_000, "S2")).unwrap();
    close_all(&mut engine, &sources);

    let events = engine.drain_events();
    let conflicts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            FusionEvent::ConflictDetected { resolution, .. } => Some(resolution),
            _ => None,
        })
        .collect();
    assert_eq!(conflicts.len(), 1);
    assert_ne!(conflicts[0].canonical, conflicts[0].superseded);
    assert_eq!(conflicts[0].canonical.identity, TransactionId::new("X"));

    assert_eq!(engine.balance(&account()), Decimal::new(150, 0));
    let canonical: Vec<_> = engine
        .store()
        .versions(&"X".into())
        .unwrap()
        .into_iter()
        .filter(|e| !e.is_superseded())
        .collect();
    assert_eq!(canonical.len(), 1);
    assert_eq!(canonical[0].record.amount, Decimal::new(150, 0));
}

#[test]
fn stalled_source_blocks_only_records_after_its_watermark() {
    let sources = ["fast", "slow"];
    let mut engine = engine(&sources, 0);
    engine
        .advance_watermark(&SourceId::new("slow"), Timestamp::new(20))
        .unwrap();
    for ts in [5, 15, 25, 30] {
        engine
            .ingest(record(&format!("f{ts}"), ts, 100, "fast"))
            .unwrap();
    }
    assert_eq!(engine.stats().finalized, 2);
    assert_eq!(engine.pending(), 2);

    engine.close_source(&SourceId::new("slow")).unwrap();
    // fast's own watermark (30) now bounds the frontier.
    assert_eq!(engine.stats().finalized, 3);
    engine.close_source(&SourceId::new("fast")).unwrap();
    assert_eq!(engine.stats().finalized, 4);
}

#[test]
fn amendment_chain_keeps_only_the_latest_correction() {
    let mut engine = engine(&["S"], 0);
    engine.ingest(record("X", 1, 10_000, "S")).unwrap();
    engine
        .ingest(record("X-fix1", 2, 9_000, "S").amending("X"))
        .unwrap();
    engine
        .ingest(record("X-fix2", 3, 9_500, "S").amending("X-fix1"))
        .unwrap();
    engine.close_source(&SourceId::new("S")).unwrap();

    assert_eq!(engine.balance(&account()), Decimal::new(95, 0));
    let effective: Vec<String> = engine
        .store()
        .entries()
        .unwrap()
        .iter()
        .filter(|e| !e.is_superseded())
        .map(|e| e.key.identity.to_string())
        .collect();
    assert_eq!(effective, vec!["X-fix2"]);
}

fn write_lines(path: &std::path::Path, lines: &[&str]) {
    let mut file = std::fs::File::create(path).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

#[tokio::test]
async fn json_sources_fuse_into_a_durable_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let bank = dir.path().join("bank.jsonl");
    let card = dir.path().join("card.jsonl");
    write_lines(
        &bank,
        &[
            r#"{"identity":"b-1","timestamp":100,"account":"checking","amount":"250.00","direction":"credit","currency":"USD"}"#,
            r#"{"identity":"b-2","timestamp":300,"account":"checking","amount":"40.25","direction":"debit","currency":"USD"}"#,
            r#"{"watermark":400}"#,
        ],
    );
    write_lines(
        &card,
        &[
            r#"{"identity":"c-1","timestamp":200,"account":"checking","amount":"15.75","direction":"debit","currency":"USD"}"#,
            r#"{"identity":"b-1","timestamp":100,"account":"checking","amount":"250.00","direction":"credit","currency":"USD"}"#,
            "{ truncated",
        ],
    );

    let store_dir = dir.path().join("ledger");
    std::fs::create_dir_all(&store_dir).unwrap();
    let config = FusionConfig {
        lateness_window: 50,
        checkpoint_interval: 2,
        ..FusionConfig::default()
    };
    {
        let store = DurableLedgerStore::open(&store_dir, WalConfig::default()).unwrap();
        let engine = FusionEngine::new(store, config.clone()).unwrap();
        let mut runtime = FusionRuntime::new(engine);
        for (id, path) in [("bank", &bank), ("card", &card)] {
            let adapter = JsonLinesAdapter::open(id, path).await.unwrap();
            runtime
                .add_source(Box::new(adapter), IdentityMode::Declared)
                .unwrap();
        }

        let (summary, _) = runtime.run().await.unwrap();
        assert!(summary.is_clean());
        assert_eq!(summary.stats.finalized, 3);
        assert_eq!(summary.stats.duplicates, 1);
        assert_eq!(summary.sources[&SourceId::new("card")], SourceOutcome::Closed);
        assert_eq!(
            summary.balances[&AccountId::new("checking")],
            Decimal::new(19400, 2)
        );
    }

    let store = DurableLedgerStore::open(&store_dir, WalConfig::default()).unwrap();
    assert_eq!(store.len().unwrap(), 3);
    let recovery = BalanceVerifier::recover(&store, Decimal::ZERO).unwrap();
    assert!(recovery.faults.is_empty());
    assert!(recovery.checkpoint_seq > 0);
    assert_eq!(
        recovery.verifier.balance(&AccountId::new("checking")),
        Decimal::new(19400, 2)
    );
}

proptest! {
    #[test]
    fn conservation_and_order_hold_under_conflicts(
        arrivals in proptest::collection::vec((0usize..6, 0u64..30, -1000i64..1000, 0usize..2), 1..40),
        lateness in 0u64..4,
    ) {
        let sources = ["S0", "S1"];
        let mut engine = engine(&sources, lateness);
        for (id, ts, cents, source) in &arrivals {
            engine
                .ingest(record(&format!("x{id}"), *ts, *cents, sources[*source]))
                .unwrap();
        }
        close_all(&mut engine, &sources);

        let entries = engine.store().entries().unwrap();
        let effective: Decimal = entries.iter().map(|e| e.contribution()).sum();
        prop_assert_eq!(engine.store().snapshot(&account()).unwrap(), effective);
        prop_assert_eq!(engine.balance(&account()), effective);
        prop_assert!(engine.faults().is_empty());

        let in_order: Vec<_> = entries.iter().filter(|e| !e.late).map(|e| e.order_key()).collect();
        prop_assert!(in_order.windows(2).all(|w| w[0] < w[1]));

        let mut live: BTreeMap<TransactionId, usize> = BTreeMap::new();
        for entry in &entries {
            *live.entry(entry.key.identity.clone()).or_default() += usize::from(!entry.is_superseded());
        }
        prop_assert!(live.values().all(|&n| n == 1));
    }

    #[test]
    fn reingesting_everything_is_idempotent(
        arrivals in proptest::collection::vec((0u64..30, 0i64..1000, 0usize..2), 1..30),
    ) {
        let sources = ["S0", "S1"];
        let mut engine = engine(&sources, 0);
        let records: Vec<_> = arrivals
            .iter()
            .enumerate()
            .map(|(i, (ts, cents, source))| record(&format!("r{i}"), *ts, *cents, sources[*source]))
            .collect();
        for r in &records {
            engine.ingest(r.clone()).unwrap();
        }
        for s in sources {
            engine.advance_watermark(&SourceId::new(s), Timestamp::new(100)).unwrap();
        }
        let len = engine.store().len().unwrap();
        let balance = engine.balance(&account());
        prop_assert_eq!(len, records.len());

        for r in &records {
            let decision = engine.ingest(r.clone()).unwrap();
            prop_assert!(
                matches!(decision, DedupDecision::RejectedDuplicate { .. }),
                "unexpected decision {:?}",
                decision
            );
        }
        prop_assert_eq!(engine.store().len().unwrap(), len);
        prop_assert_eq!(engine.balance(&account()), balance);
    }
}
