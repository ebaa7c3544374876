//! Per-connector relay of source-chain events
//!
//! For every event in a block range: classify it, build its proof, skip it if
//! the destination already consumed the proof, otherwise submit it. The
//! connector's proof-usage check is what makes re-scanning a range safe.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connectors::{Connector, ProofUsage};
use crate::incentivizer::Incentivizer;
use crate::metrics;
use crate::proof::ProofError;
use crate::source::events::{decode_event, event_signature, is_event_for_aurora, DecodedEvent};
use crate::source::{EventSource, SourceEvent};
use crate::types::{AuroraPolicy, BridgeAssetKind};

/// Successful relay, as written to the relay ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRecord {
    pub kind: BridgeAssetKind,
    pub event_tx_hash: String,
    pub block_number: u64,
    pub deposit_tx_hash: String,
}

#[async_trait]
pub trait RelayLedger: Send + Sync {
    async fn record_relay(&self, record: &RelayRecord) -> Result<()>;
}

/// What to watch for one bridge asset kind
#[derive(Debug, Clone)]
pub struct RelayStrategy {
    pub kind: BridgeAssetKind,
    pub contract_address: Address,
    pub event_signature: B256,
    pub aurora_policy: AuroraPolicy,
}

impl RelayStrategy {
    pub fn for_kind(kind: BridgeAssetKind, contract_address: Address) -> Self {
        Self {
            kind,
            contract_address,
            event_signature: event_signature(kind),
            aurora_policy: kind.aurora_policy(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Events whose proof was built and checked
    pub processed: u64,
    /// Events skipped because their proof was already used
    pub skipped: u64,
    /// Events submitted successfully
    pub relayed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    Completed,
    /// Stopped between events because the relayer was closed
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct RelayerSettings {
    /// Account prefix marking aurora-bound recipients
    pub routing_target: String,
    pub relay_only_aurora_events: bool,
}

pub struct EventRelayer {
    strategy: RelayStrategy,
    source: Arc<dyn EventSource>,
    connector: Arc<dyn Connector>,
    ledger: Arc<dyn RelayLedger>,
    incentivizer: Option<Arc<Incentivizer>>,
    settings: RelayerSettings,
    stats: RelayStats,
    cancel: CancellationToken,
}

impl EventRelayer {
    pub fn new(
        strategy: RelayStrategy,
        source: Arc<dyn EventSource>,
        connector: Arc<dyn Connector>,
        ledger: Arc<dyn RelayLedger>,
        settings: RelayerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            strategy,
            source,
            connector,
            ledger,
            incentivizer: None,
            settings,
            stats: RelayStats::default(),
            cancel,
        }
    }

    pub fn with_incentivizer(mut self, incentivizer: Arc<Incentivizer>) -> Self {
        self.incentivizer = Some(incentivizer);
        self
    }

    pub fn kind(&self) -> BridgeAssetKind {
        self.strategy.kind
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Stop at the next event boundary
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Relay all events of the inclusive block range
    pub async fn process_event(&mut self, from_block: u64, to_block: u64) -> Result<RangeOutcome> {
        let kind = self.strategy.kind;
        let events = self
            .source
            .events(
                self.strategy.contract_address,
                self.strategy.event_signature,
                from_block,
                to_block,
            )
            .await?;
        if events.is_empty() {
            return Ok(RangeOutcome::Completed);
        }

        info!(
            kind = %kind,
            count = events.len(),
            from_block,
            to_block,
            relay_only_aurora_events = self.settings.relay_only_aurora_events,
            "Found events"
        );

        for event in &events {
            if self.is_closed() {
                info!(kind = %kind, "Relayer closed, leaving block range unfinished");
                return Ok(RangeOutcome::Interrupted);
            }

            let decoded = match decode_event(kind, event) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(kind = %kind, tx_hash = ?event.transaction_hash, error = ?e, "Skipping undecodable event");
                    continue;
                }
            };

            let is_aurora = self.strategy.aurora_policy.classifies()
                && is_event_for_aurora(&self.settings.routing_target, &decoded.routing_message);
            if !self
                .strategy
                .aurora_policy
                .accepts(is_aurora, self.settings.relay_only_aurora_events)
            {
                debug!(kind = %kind, tx_hash = ?event.transaction_hash, is_aurora, "Event not eligible");
                continue;
            }

            info!(
                kind = %kind,
                tx_hash = ?event.transaction_hash,
                block_number = event.block_number,
                is_aurora,
                "Processing event"
            );
            if let Err(e) = self.relay(event, decoded).await {
                match e.downcast_ref::<ProofError>() {
                    Some(integrity) => {
                        error!(
                            kind = %kind,
                            tx_hash = ?event.transaction_hash,
                            error = %integrity,
                            "Proof integrity check failed, event will not be relayed"
                        );
                        metrics::record_integrity_failure(kind);
                    }
                    None => return Err(e),
                }
            }
        }
        Ok(RangeOutcome::Completed)
    }

    async fn relay(&mut self, event: &SourceEvent, decoded: DecodedEvent) -> Result<()> {
        let kind = self.strategy.kind;
        let envelope = self.source.proof_for_event(kind, event).await?;
        let proof = envelope.encode()?;
        let usage = self.connector.is_used_proof(&proof).await?;

        self.stats.processed += 1;
        metrics::record_processed(kind);

        match usage {
            ProofUsage::Used => {
                self.stats.skipped += 1;
                metrics::record_skipped(kind);
                info!(kind = %kind, tx_hash = ?event.transaction_hash, "Proof already used, skipping");
                return Ok(());
            }
            ProofUsage::Unsupported => {
                debug!(kind = %kind, "Connector has no proof-usage check, submitting");
            }
            ProofUsage::Unused => {}
        }

        let deposit_tx_hash = match self.connector.submit(&proof).await {
            Ok(hash) => hash,
            Err(e) => {
                error!(
                    kind = %kind,
                    tx_hash = ?event.transaction_hash,
                    connector = %self.connector.account_id(),
                    error = ?e,
                    "Failed to submit proof"
                );
                metrics::record_submit_failure(kind);
                // Not retried: the cursor still moves past this window
                return Ok(());
            }
        };

        self.stats.relayed += 1;
        metrics::record_relayed(kind, event.block_number);
        info!(
            kind = %kind,
            tx_hash = ?event.transaction_hash,
            deposit_tx_hash = %deposit_tx_hash,
            "Relayed event"
        );

        let record = RelayRecord {
            kind,
            event_tx_hash: format!("{:?}", event.transaction_hash),
            block_number: event.block_number,
            deposit_tx_hash,
        };
        if let Err(e) = self.ledger.record_relay(&record).await {
            error!(error = ?e, tx_hash = %record.event_tx_hash, "Failed to record relayed event");
        }

        if let (Some(incentivizer), Some(lock)) = (&self.incentivizer, &decoded.lock) {
            incentivizer.incentivize(lock).await;
        }
        Ok(())
    }
}
