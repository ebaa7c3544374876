use clap::Parser;
use eyre::{eyre, Result, WrapErr};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use relayer::config::Config;
use relayer::connectors::{ConnectorRegistry, NearConnector};
use relayer::db::{self, SqlLedger};
use relayer::event_relayer::{EventRelayer, RelayStrategy, RelayerSettings};
use relayer::incentivizer::{BinancePriceSource, IncentivizationConfig, Incentivizer};
use relayer::near::{NearClient, NearDestination, NearFungibleTokens, NearSigner};
use relayer::orchestrator::{OrchestratorSettings, RelayOrchestrator};
use relayer::proof::{FileReceiptCache, ProofGenerator};
use relayer::rpc::{HttpJsonRpc, JsonRpc};
use relayer::session::{FileSessionStore, RelaySession, SessionStore, DEFAULT_SESSION_FILE};
use relayer::source::EthSource;
use relayer::{api, metrics};

#[derive(Parser)]
#[command(name = "eth2near-relayer")]
#[command(about = "Relays Ethereum bridge events to their NEAR connectors", long_about = None)]
struct Cli {
    /// The block number from which to start relaying
    #[arg(
        long,
        required_unless_present = "restore_last_session",
        conflicts_with = "restore_last_session"
    )]
    start_from_block: Option<u64>,

    /// Resume from the last recorded session
    #[arg(long)]
    restore_last_session: bool,

    /// Network preset (mainnet, goerli) or path to a JSON config file
    #[arg(long, default_value = "goerli")]
    network: String,

    /// Where the relay cursor is persisted
    #[arg(long, default_value = DEFAULT_SESSION_FILE)]
    session_file: PathBuf,
}

fn main() -> Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    init_logging();

    tracing::info!("Starting Ethereum to NEAR event relayer");

    let sessions = Arc::new(FileSessionStore::new(cli.session_file.clone()));
    let session = if cli.restore_last_session {
        tracing::info!(path = %cli.session_file.display(), "Restarting from the last session");
        sessions.load().await?.ok_or_else(|| {
            eyre!(
                "Session file {} does not exist, can not restore the last session",
                cli.session_file.display()
            )
        })?
    } else {
        let start = cli
            .start_from_block
            .ok_or_else(|| eyre!("--start-from-block is required"))?;
        RelaySession::starting_at(start, &cli.network)
    };

    // Load configuration
    let config = Config::load(&session.network)?;
    tracing::info!(
        network = %config.network,
        cursor = session.last_processed_source_height,
        confirmations = config.relayer.num_required_client_confirmations,
        polling_interval_ms = config.relayer.polling_interval_ms,
        "Configuration loaded"
    );

    // Connect to database
    let pool = db::create_pool(&config.database.url).await?;
    db::run_migrations(&pool).await?;
    let ledger = Arc::new(SqlLedger::new(pool));
    tracing::info!("Database ready");

    // Ethereum side
    let eth_rpc: Arc<dyn JsonRpc> = Arc::new(HttpJsonRpc::new(&config.source.rpc_url)?);
    let mut proofs = ProofGenerator::new(eth_rpc.clone(), config.source.retrieve_receipts_mode);
    if let Some(dir) = &config.source.receipts_cache_dir {
        proofs = proofs.with_cache(Arc::new(FileReceiptCache::new(dir.clone())));
    }
    if let Some(dir) = &config.source.proofs_dir {
        proofs = proofs.with_dump_dir(dir.clone());
    }
    let source = Arc::new(EthSource::new(eth_rpc, proofs));

    // NEAR side
    let key_path = config
        .near
        .key_path
        .as_ref()
        .ok_or_else(|| eyre!("near.key_path is not set (set NEAR_KEY_PATH)"))?;
    let signer = NearSigner::from_key_file(key_path)?;
    if signer.account_id() != config.near.relayer_account {
        return Err(eyre!(
            "Key file belongs to {}, expected {}",
            signer.account_id(),
            config.near.relayer_account
        ));
    }
    let near = Arc::new(NearClient::new(
        Arc::new(HttpJsonRpc::new(&config.near.json_rpc)?),
        Some(signer),
    ));
    let balance = near
        .account_balance(&config.near.relayer_account)
        .await
        .wrap_err("Failed to read the relayer account balance")?;
    metrics::set_relayer_balance(balance);
    tracing::info!(
        account = %config.near.relayer_account,
        balance_yocto = %balance,
        "Relayer account loaded"
    );

    let incentivizer = match &config.incentivization {
        Some(settings) => {
            let rules = IncentivizationConfig::load(&settings.rules_path)?.rules;
            let incentivizer = Incentivizer::new(
                &config.near.relayer_account,
                rules,
                Arc::new(BinancePriceSource::new(&settings.price_api_url)?),
                Arc::new(NearFungibleTokens::new(near.clone())),
                ledger.clone(),
            );
            incentivizer.validate_rules(source.as_ref()).await?;
            Some(Arc::new(incentivizer))
        }
        None => None,
    };

    let mut connectors = ConnectorRegistry::new();
    for connector in config.enabled_connectors() {
        connectors.register(Arc::new(NearConnector::new(
            connector.kind,
            &connector.near_account,
            near.clone(),
        )))?;
    }
    tracing::info!(kinds = ?connectors.kinds(), "Connectors registered");

    let shutdown = CancellationToken::new();
    let mut orchestrator = RelayOrchestrator::new(
        Arc::new(NearDestination::new(
            near.clone(),
            &config.near.eth_on_near_client_account,
        )),
        sessions,
        session,
        OrchestratorSettings {
            required_confirmations: config.relayer.num_required_client_confirmations,
            poll_interval: config.poll_interval(),
        },
        shutdown.clone(),
    );

    let settings = RelayerSettings {
        routing_target: config.near.aurora_account.clone(),
        relay_only_aurora_events: config.relayer.relay_only_aurora_events,
    };
    for connector in config.enabled_connectors() {
        let mut relayer = EventRelayer::new(
            RelayStrategy::for_kind(connector.kind, connector.address()?),
            source.clone(),
            connectors.get(connector.kind)?,
            ledger.clone(),
            settings.clone(),
            shutdown.child_token(),
        );
        if let Some(incentivizer) = &incentivizer {
            relayer = relayer.with_incentivizer(incentivizer.clone());
        }
        tracing::info!(kind = %connector.kind, near_account = %connector.near_account, "Relayer enabled");
        orchestrator.add_relayer(relayer);
    }

    // Start metrics/API server
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.relayer.api_port));
    let api_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_shutdown).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    // Setup signal handlers
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_shutdown.cancel();
    });

    orchestrator.run().await?;

    tracing::info!("Ethereum to NEAR event relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,relayer=debug,eth2near_relayer=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
