//! Single-writer runtime around the [`FusionEngine`].
//!
//! ```text
//!   SourceAdapter ──► source worker ─┐
//!   SourceAdapter ──► source worker ─┼─► mpsc (bounded) ─► EngineActor ─► LedgerStore
//!   SourceAdapter ──► source worker ─┘                         │
//!                                                              └─► broadcast<FusionEvent>
//! ```
//!
//! Each adapter is driven by its own task; a stalled adapter only holds back
//! its own watermark. The actor owns the engine and handles one message at a
//! time, so store appends are never concurrent. Shutdown stops the workers,
//! finalizes everything still buffered and hands the engine back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lf_index::DedupDecision;
use lf_store::{BalanceCheckpoint, LedgerStore};
use lf_types::{AccountId, Decimal, SourceId, Timestamp, TransactionRecord};
use lf_verify::{AccountStatus, ReconciliationFault};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::adapter::{SourceAdapter, SourceItem};
use crate::config::{FusionConfig, IdentityMode};
use crate::engine::{EngineStats, FusionEngine};
use crate::error::{AdapterError, FusionError, FusionResult};
use crate::event::FusionEvent;

/// Message sent to the engine actor.
pub enum EngineMessage {
    Ingest {
        record: TransactionRecord,
        response: oneshot::Sender<FusionResult<DedupDecision>>,
    },
    AdvanceWatermark {
        source: SourceId,
        timestamp: Timestamp,
        response: oneshot::Sender<FusionResult<usize>>,
    },
    CloseSource {
        source: SourceId,
        response: oneshot::Sender<FusionResult<usize>>,
    },
    FailSource {
        source: SourceId,
        reason: String,
        response: oneshot::Sender<FusionResult<usize>>,
    },
    Balance {
        account: AccountId,
        response: oneshot::Sender<Decimal>,
    },
    AccountStatus {
        account: AccountId,
        response: oneshot::Sender<AccountStatus>,
    },
    Reaudit {
        account: AccountId,
        response: oneshot::Sender<FusionResult<AccountStatus>>,
    },
    Checkpoint {
        response: oneshot::Sender<FusionResult<BalanceCheckpoint>>,
    },
    Stats {
        response: oneshot::Sender<EngineStats>,
    },
    /// Finalize everything and stop the actor.
    Shutdown {
        response: oneshot::Sender<FusionResult<EngineStats>>,
    },
}

/// Cloneable handle for talking to the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineMessage>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineMessage,
    ) -> FusionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| FusionError::Shutdown)?;
        rx.await.map_err(|_| FusionError::Shutdown)
    }

    pub async fn ingest(&self, record: TransactionRecord) -> FusionResult<DedupDecision> {
        self.request(|response| EngineMessage::Ingest { record, response })
            .await?
    }

    pub async fn advance_watermark(&self, source: SourceId, timestamp: Timestamp) -> FusionResult<usize> {
        self.request(|response| EngineMessage::AdvanceWatermark {
            source,
            timestamp,
            response,
        })
        .await?
    }

    pub async fn close_source(&self, source: SourceId) -> FusionResult<usize> {
        self.request(|response| EngineMessage::CloseSource { source, response })
            .await?
    }

    pub async fn fail_source(&self, source: SourceId, reason: String) -> FusionResult<usize> {
        self.request(|response| EngineMessage::FailSource {
            source,
            reason,
            response,
        })
        .await?
    }

    pub async fn balance(&self, account: AccountId) -> FusionResult<Decimal> {
        self.request(|response| EngineMessage::Balance { account, response })
            .await
    }

    pub async fn account_status(&self, account: AccountId) -> FusionResult<AccountStatus> {
        self.request(|response| EngineMessage::AccountStatus { account, response })
            .await
    }

    pub async fn reaudit(&self, account: AccountId) -> FusionResult<AccountStatus> {
        self.request(|response| EngineMessage::Reaudit { account, response })
            .await?
    }

    pub async fn checkpoint(&self) -> FusionResult<BalanceCheckpoint> {
        self.request(|response| EngineMessage::Checkpoint { response })
            .await?
    }

    pub async fn stats(&self) -> FusionResult<EngineStats> {
        self.request(|response| EngineMessage::Stats { response })
            .await
    }

    pub async fn shutdown(&self) -> FusionResult<EngineStats> {
        self.request(|response| EngineMessage::Shutdown { response })
            .await?
    }
}

/// Actor that owns the engine and serializes every operation on it.
pub struct EngineActor<S> {
    engine: FusionEngine<S>,
    mailbox: mpsc::Receiver<EngineMessage>,
    events: broadcast::Sender<FusionEvent>,
}

impl<S: LedgerStore + 'static> EngineActor<S> {
    pub fn new(
        engine: FusionEngine<S>,
        mailbox: mpsc::Receiver<EngineMessage>,
        events: broadcast::Sender<FusionEvent>,
    ) -> Self {
        Self {
            engine,
            mailbox,
            events,
        }
    }

    /// Process messages until shutdown or until every handle is dropped.
    /// Returns the engine so its final state can be inspected.
    pub async fn run(mut self) -> FusionEngine<S> {
        self.publish();
        while let Some(message) = self.mailbox.recv().await {
            let stop = self.handle(message);
            self.publish();
            if stop {
                break;
            }
        }
        debug!("engine actor stopped");
        self.engine
    }

    fn handle(&mut self, message: EngineMessage) -> bool {
        let engine = &mut self.engine;
        match message {
            EngineMessage::Ingest { record, response } => {
                let _ = response.send(engine.ingest(record));
            }
            EngineMessage::AdvanceWatermark {
                source,
                timestamp,
                response,
            } => {
                let _ = response.send(engine.advance_watermark(&source, timestamp));
            }
            EngineMessage::CloseSource { source, response } => {
                let _ = response.send(engine.close_source(&source));
            }
            EngineMessage::FailSource {
                source,
                reason,
                response,
            } => {
                let _ = response.send(engine.fail_source(&source, reason));
            }
            EngineMessage::Balance { account, response } => {
                let _ = response.send(engine.balance(&account));
            }
            EngineMessage::AccountStatus { account, response } => {
                let _ = response.send(engine.account_status(&account));
            }
            EngineMessage::Reaudit { account, response } => {
                let _ = response.send(engine.reaudit(&account));
            }
            EngineMessage::Checkpoint { response } => {
                let _ = response.send(engine.checkpoint());
            }
            EngineMessage::Stats { response } => {
                let _ = response.send(engine.stats());
            }
            EngineMessage::Shutdown { response } => {
                let result = engine.shutdown().map(|_| engine.stats());
                let _ = response.send(result);
                return true;
            }
        }
        false
    }

    fn publish(&mut self) {
        for event in self.engine.drain_events() {
            // No subscribers is fine; events are also logged.
            let _ = self.events.send(event);
        }
    }
}

/// How a source worker ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceOutcome {
    /// The adapter reported the end of its input.
    Closed,
    /// The source was marked failed.
    Failed { reason: String },
    /// Stopped by a shutdown request before the adapter finished.
    Interrupted,
    /// The engine refused to continue, e.g. after a store error.
    Aborted { reason: String },
}

impl SourceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SourceOutcome::Failed { .. } | SourceOutcome::Aborted { .. })
    }
}

/// Result of a complete run.
#[derive(Debug)]
pub struct RunSummary {
    pub stats: EngineStats,
    pub balances: BTreeMap<AccountId, Decimal>,
    pub sources: BTreeMap<SourceId, SourceOutcome>,
    /// Accounts still unverified at shutdown.
    pub faults: Vec<ReconciliationFault>,
}

impl RunSummary {
    /// Every source failed.
    pub fn total_source_failure(&self) -> bool {
        !self.sources.is_empty() && self.sources.values().all(SourceOutcome::is_failure)
    }

    /// `true` when no account is left unverified and at least one source
    /// delivered its input.
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty() && !self.total_source_failure()
    }
}

/// Requests a graceful shutdown of a running [`FusionRuntime`].
#[derive(Clone)]
pub struct ShutdownTrigger {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.sender.send(true);
    }
}

#[derive(Clone, Copy, Debug)]
struct WorkerPolicy {
    read_timeout: Option<Duration>,
    max_transient_failures: u32,
}

/// Runs source adapters against one engine until they finish.
pub struct FusionRuntime<S> {
    engine: FusionEngine<S>,
    adapters: Vec<Box<dyn SourceAdapter>>,
    events: broadcast::Sender<FusionEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<S: LedgerStore + 'static> FusionRuntime<S> {
    pub fn new(engine: FusionEngine<S>) -> Self {
        let (events, _) = broadcast::channel(engine.config().channel_capacity);
        let (shutdown, _) = watch::channel(false);
        Self {
            engine,
            adapters: Vec::new(),
            events,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Register an adapter's source with the engine and schedule it.
    pub fn add_source(&mut self, adapter: Box<dyn SourceAdapter>, mode: IdentityMode) -> FusionResult<()> {
        self.engine
            .register_source(adapter.source_id().clone(), mode)?;
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FusionEvent> {
        self.events.subscribe()
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            sender: Arc::clone(&self.shutdown),
        }
    }

    /// Drive every adapter to completion, then shut the engine down.
    pub async fn run(self) -> FusionResult<(RunSummary, FusionEngine<S>)> {
        let config: FusionConfig = self.engine.config().clone();
        let policy = WorkerPolicy {
            read_timeout: config.read_timeout(),
            max_transient_failures: config.max_transient_failures,
        };

        let (sender, mailbox) = mpsc::channel(config.channel_capacity);
        let handle = EngineHandle { sender };
        let actor = EngineActor::new(self.engine, mailbox, self.events.clone());
        let actor_task = tokio::spawn(actor.run());

        info!(sources = self.adapters.len(), "fusion runtime started");
        let mut workers = JoinSet::new();
        for adapter in self.adapters {
            workers.spawn(run_source(
                handle.clone(),
                adapter,
                policy,
                self.shutdown.subscribe(),
            ));
        }

        let mut sources = BTreeMap::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((source, outcome)) => {
                    debug!(%source, ?outcome, "source worker finished");
                    sources.insert(source, outcome);
                }
                Err(e) => error!(error = %e, "source worker panicked"),
            }
        }

        let stats = handle.shutdown().await?;
        drop(handle);
        let engine = actor_task
            .await
            .map_err(|e| FusionError::Task(e.to_string()))?;

        let summary = RunSummary {
            stats,
            balances: engine.balances(),
            sources,
            faults: engine.faults(),
        };
        info!(
            finalized = summary.stats.finalized,
            accounts = summary.balances.len(),
            faults = summary.faults.len(),
            "fusion runtime finished"
        );
        Ok((summary, engine))
    }
}

async fn read_next(
    adapter: &mut Box<dyn SourceAdapter>,
    timeout: Option<Duration>,
) -> Result<SourceItem, AdapterError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, adapter.next())
            .await
            .unwrap_or(Err(AdapterError::TimedOut {
                after_ms: limit.as_millis() as u64,
            })),
        None => adapter.next().await,
    }
}

/// Pump one adapter into the engine until it closes, fails or is stopped.
async fn run_source(
    handle: EngineHandle,
    mut adapter: Box<dyn SourceAdapter>,
    policy: WorkerPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> (SourceId, SourceOutcome) {
    let source = adapter.source_id().clone();
    let mut transient = 0u32;

    let outcome = loop {
        if *shutdown.borrow() {
            break SourceOutcome::Interrupted;
        }
        let item = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break SourceOutcome::Interrupted;
                }
                continue;
            }
            item = read_next(&mut adapter, policy.read_timeout) => item,
        };

        let sent = match item {
            Ok(SourceItem::Record(record)) => {
                transient = 0;
                match handle.ingest(record.with_source(source.clone())).await {
                    Err(e) if e.is_rejection() => {
                        info!(%source, error = %e, "record rejected");
                        Ok(())
                    }
                    other => other.map(|_| ()),
                }
            }
            Ok(SourceItem::Watermark(ts)) => {
                transient = 0;
                handle
                    .advance_watermark(source.clone(), ts)
                    .await
                    .map(|_| ())
            }
            Ok(SourceItem::Closed) => {
                break match handle.close_source(source.clone()).await {
                    Ok(_) => SourceOutcome::Closed,
                    Err(e) => SourceOutcome::Aborted {
                        reason: e.to_string(),
                    },
                };
            }
            Err(AdapterError::Malformed { location, reason }) => {
                debug!(%source, %location, %reason, "skipping malformed input");
                Ok(())
            }
            Err(AdapterError::Transient(reason)) if transient < policy.max_transient_failures => {
                transient += 1;
                info!(%source, %reason, attempt = transient, "transient read failure");
                tokio::time::sleep(Duration::from_millis(10 * u64::from(transient))).await;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                break match handle.fail_source(source.clone(), reason.clone()).await {
                    Ok(_) => SourceOutcome::Failed { reason },
                    Err(e) => SourceOutcome::Aborted {
                        reason: e.to_string(),
                    },
                };
            }
        };

        if let Err(e) = sent {
            error!(%source, error = %e, "engine refused input, stopping source");
            break SourceOutcome::Aborted {
                reason: e.to_string(),
            };
        }
    };
    (source, outcome)
}
