//! Relay loop over source-chain heights
//!
//! Each cycle asks the destination light client how far it has synced,
//! subtracts the confirmation depth and hands the unprocessed window to every
//! relayer in turn. The cursor only moves once every relayer finished the
//! window.

use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::event_relayer::{EventRelayer, RangeOutcome};
use crate::metrics;
use crate::session::{RelaySession, SessionStore};

/// Destination-side view of the source chain
#[async_trait]
pub trait DestinationChain: Send + Sync {
    /// Highest source block known to the destination light client
    async fn last_block_number(&self) -> Result<u64>;

    /// Balance of the relayer account, when one is configured
    async fn relayer_balance(&self) -> Result<Option<u128>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Polling,
    Synced,
    /// The cursor is ahead of the destination light client
    OutOfRange,
    Sleeping,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Advanced { from_block: u64, to_block: u64 },
    /// No new safe blocks yet
    Waiting,
    /// Cursor is past the light client height
    DestinationBehind,
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub required_confirmations: u64,
    pub poll_interval: Duration,
}

pub struct RelayOrchestrator {
    relayers: Vec<EventRelayer>,
    destination: Arc<dyn DestinationChain>,
    sessions: Arc<dyn SessionStore>,
    session: RelaySession,
    settings: OrchestratorSettings,
    state: OrchestratorState,
    cancel: CancellationToken,
}

impl RelayOrchestrator {
    pub fn new(
        destination: Arc<dyn DestinationChain>,
        sessions: Arc<dyn SessionStore>,
        session: RelaySession,
        settings: OrchestratorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            relayers: Vec::new(),
            destination,
            sessions,
            session,
            settings,
            state: OrchestratorState::Idle,
            cancel,
        }
    }

    pub fn add_relayer(&mut self, relayer: EventRelayer) {
        self.relayers.push(relayer);
    }

    pub fn relayers(&self) -> &[EventRelayer] {
        &self.relayers
    }

    /// Last fully processed source block
    pub fn cursor(&self) -> u64 {
        self.session.last_processed_source_height
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Token that stops the loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the loop and every relayer; safe to call repeatedly
    pub fn close(&mut self) {
        self.cancel.cancel();
        for relayer in &self.relayers {
            relayer.close();
        }
        self.state = OrchestratorState::Closed;
    }

    async fn refresh_balance(&self) {
        match self.destination.relayer_balance().await {
            Ok(Some(balance)) => metrics::set_relayer_balance(balance),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Failed to refresh relayer balance"),
        }
    }

    /// Run one polling cycle
    ///
    /// The cursor only moves once every relayer has finished the window. When
    /// a relayer fails, the whole window is scanned again on the next cycle,
    /// so kinds whose connector cannot report proof usage (erc721, fast
    /// bridge) resubmit events already relayed by earlier relayers.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.state = OrchestratorState::Polling;
        self.refresh_balance().await;

        let client_height = self.destination.last_block_number().await?;
        let safe_height = client_height.saturating_sub(self.settings.required_confirmations);
        let cursor = self.cursor();
        metrics::set_heights(client_height, cursor);

        if safe_height > cursor {
            let (from_block, to_block) = (cursor + 1, safe_height);
            info!(from_block, to_block, client_height, "Processing blocks");

            for relayer in &mut self.relayers {
                if self.cancel.is_cancelled() {
                    return Ok(CycleOutcome::Interrupted);
                }
                if relayer.process_event(from_block, to_block).await? == RangeOutcome::Interrupted {
                    return Ok(CycleOutcome::Interrupted);
                }
            }
            if self.cancel.is_cancelled() {
                return Ok(CycleOutcome::Interrupted);
            }

            self.session.last_processed_source_height = to_block;
            metrics::set_heights(client_height, to_block);
            if let Err(e) = self.sessions.save(&self.session).await {
                error!(error = ?e, last_processed = to_block, "Failed to persist session");
            }
            self.state = OrchestratorState::Synced;
            Ok(CycleOutcome::Advanced {
                from_block,
                to_block,
            })
        } else if cursor > client_height {
            warn!(
                cursor,
                client_height,
                "Relayer is ahead of the light client, waiting for it to catch up"
            );
            self.state = OrchestratorState::OutOfRange;
            Ok(CycleOutcome::DestinationBehind)
        } else {
            debug!(cursor, safe_height, "Waiting for new confirmed blocks");
            self.state = OrchestratorState::Synced;
            Ok(CycleOutcome::Waiting)
        }
    }

    /// Poll until closed
    pub async fn run(&mut self) -> Result<()> {
        info!(
            cursor = self.cursor(),
            network = %self.session.network,
            relayers = self.relayers.len(),
            confirmations = self.settings.required_confirmations,
            "Starting relay loop"
        );

        while !self.cancel.is_cancelled() {
            match self.run_cycle().await {
                Ok(outcome) => debug!(?outcome, "Relay cycle finished"),
                Err(e) => {
                    error!(error = ?e, cursor = self.cursor(), "Relay cycle failed");
                    metrics::record_cycle_error();
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }

            self.state = OrchestratorState::Sleeping;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        self.close();
        info!(cursor = self.cursor(), "Relay loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_relayer::{RelayStrategy, RelayerSettings};
    use crate::testing::{
        erc20_locked_event, nft_locked_event, MemoryRelayLedger, MemorySessionStore,
        MockConnector, MockDestination, MockEventSource,
    };
    use crate::types::BridgeAssetKind;
    use alloy_primitives::{Address, U256};

    fn relayer(source: Arc<MockEventSource>, cancel: CancellationToken) -> EventRelayer {
        EventRelayer::new(
            RelayStrategy::for_kind(BridgeAssetKind::Erc20Lock, Address::repeat_byte(1)),
            source,
            Arc::new(MockConnector::new(BridgeAssetKind::Erc20Lock)),
            Arc::new(MemoryRelayLedger::default()),
            RelayerSettings {
                routing_target: "aurora".into(),
                relay_only_aurora_events: false,
            },
            cancel,
        )
    }

    fn orchestrator(
        heights: &[u64],
        cursor: u64,
        source: Arc<MockEventSource>,
    ) -> (RelayOrchestrator, Arc<MemorySessionStore>) {
        let sessions = Arc::new(MemorySessionStore::default());
        let cancel = CancellationToken::new();
        let mut orchestrator = RelayOrchestrator::new(
            Arc::new(MockDestination::new(heights)),
            sessions.clone(),
            RelaySession {
                last_processed_source_height: cursor,
                network: "goerli".into(),
            },
            OrchestratorSettings {
                required_confirmations: 10,
                poll_interval: Duration::from_secs(60),
            },
            cancel.clone(),
        );
        orchestrator.add_relayer(relayer(source, cancel.child_token()));
        (orchestrator, sessions)
    }

    #[tokio::test]
    async fn test_cycle_advances_to_safe_height() {
        let source = Arc::new(MockEventSource::new(vec![]));
        let (mut orch, sessions) = orchestrator(&[200], 100, source.clone());

        let outcome = orch.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Advanced {
                from_block: 101,
                to_block: 190
            }
        );
        assert_eq!(orch.cursor(), 190);
        assert_eq!(orch.state(), OrchestratorState::Synced);
        assert_eq!(source.queried_ranges(), vec![(101, 190)]);
        assert_eq!(sessions.saved().unwrap().last_processed_source_height, 190);
    }

    #[tokio::test]
    async fn test_start_from_genesis_scans_from_block_one() {
        let source = Arc::new(MockEventSource::new(vec![]));
        let cursor = RelaySession::starting_at(0, "goerli").last_processed_source_height;
        let (mut orch, _) = orchestrator(&[200], cursor, source.clone());

        orch.run_cycle().await.unwrap();
        assert_eq!(source.queried_ranges(), vec![(1, 190)]);
    }

    #[tokio::test]
    async fn test_cycle_waits_without_new_safe_blocks() {
        let source = Arc::new(MockEventSource::new(vec![]));
        let (mut orch, sessions) = orchestrator(&[110], 100, source.clone());

        assert_eq!(orch.run_cycle().await.unwrap(), CycleOutcome::Waiting);
        assert_eq!(orch.cursor(), 100);
        assert!(source.queried_ranges().is_empty());
        assert!(sessions.saved().is_none());
    }

    #[tokio::test]
    async fn test_cursor_ahead_of_light_client() {
        let source = Arc::new(MockEventSource::new(vec![]));
        let (mut orch, _) = orchestrator(&[50], 100, source);

        assert_eq!(
            orch.run_cycle().await.unwrap(),
            CycleOutcome::DestinationBehind
        );
        assert_eq!(orch.state(), OrchestratorState::OutOfRange);
        assert_eq!(orch.cursor(), 100);
    }

    #[tokio::test]
    async fn test_failed_window_is_retried() {
        let event = erc20_locked_event(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            U256::from(1u64),
            "alice.near",
        );
        let source = Arc::new(MockEventSource::new(vec![event]));
        source.fail_proofs_with_io();
        let (mut orch, sessions) = orchestrator(&[200, 205], 100, source.clone());

        assert!(orch.run_cycle().await.is_err());
        assert_eq!(orch.cursor(), 100);
        assert!(sessions.saved().is_none());

        source.heal();
        let outcome = orch.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Advanced {
                from_block: 101,
                to_block: 195
            }
        );
    }

    #[tokio::test]
    async fn test_retried_window_resubmits_unchecked_kinds() {
        let nft_source = Arc::new(MockEventSource::new(vec![nft_locked_event(
            Address::repeat_byte(3),
            "bob.near",
        )]));
        let nft_connector = Arc::new(MockConnector::new(BridgeAssetKind::Erc721Lock));
        let erc20_source = Arc::new(MockEventSource::new(vec![erc20_locked_event(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            U256::from(1u64),
            "alice.near",
        )]));
        erc20_source.fail_proofs_with_io();

        let cancel = CancellationToken::new();
        let mut orch = RelayOrchestrator::new(
            Arc::new(MockDestination::new(&[200, 205])),
            Arc::new(MemorySessionStore::default()),
            RelaySession {
                last_processed_source_height: 100,
                network: "goerli".into(),
            },
            OrchestratorSettings {
                required_confirmations: 10,
                poll_interval: Duration::from_secs(60),
            },
            cancel.clone(),
        );
        orch.add_relayer(EventRelayer::new(
            RelayStrategy::for_kind(BridgeAssetKind::Erc721Lock, Address::repeat_byte(3)),
            nft_source,
            nft_connector.clone(),
            Arc::new(MemoryRelayLedger::default()),
            RelayerSettings {
                routing_target: "aurora".into(),
                relay_only_aurora_events: false,
            },
            cancel.child_token(),
        ));
        orch.add_relayer(relayer(erc20_source.clone(), cancel.child_token()));

        assert!(orch.run_cycle().await.is_err());
        assert_eq!(orch.cursor(), 100);
        assert_eq!(nft_connector.submissions().len(), 1);

        erc20_source.heal();
        assert!(matches!(
            orch.run_cycle().await.unwrap(),
            CycleOutcome::Advanced { from_block: 101, .. }
        ));
        assert_eq!(nft_connector.submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_close_interrupts_and_keeps_cursor() {
        let event = erc20_locked_event(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            U256::from(1u64),
            "alice.near",
        );
        let source = Arc::new(MockEventSource::new(vec![event]));
        let (mut orch, sessions) = orchestrator(&[200], 100, source);

        orch.close();
        orch.close();
        assert!(orch.relayers().iter().all(EventRelayer::is_closed));
        assert_eq!(orch.run_cycle().await.unwrap(), CycleOutcome::Interrupted);
        assert_eq!(orch.cursor(), 100);
        assert!(sessions.saved().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_promptly_when_cancelled() {
        let source = Arc::new(MockEventSource::new(vec![]));
        let (mut orch, _) = orchestrator(&[200], 100, source);
        let token = orch.shutdown_token();

        let handle = tokio::spawn(async move {
            orch.run().await.unwrap();
            orch
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let orch = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("relay loop did not stop")
            .unwrap();
        assert_eq!(orch.state(), OrchestratorState::Closed);
        assert_eq!(orch.cursor(), 190);
    }
}
