//! ROUNDWAGER: automated betting agent for on-chain up/down rounds.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects the chain and price feeds, then runs the betting loop with its
//! background tasks until Ctrl+C.
//!
//! Usage: `roundwager [config.toml]` or `roundwager report [config.toml]`.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use roundwager::config::AppConfig;
use roundwager::dashboard::{spawn_status_server, StatusState};
use roundwager::engine::accountant::{Accountant, PerformanceReport};
use roundwager::engine::balance::{BalanceConfig, BalanceRefresher};
use roundwager::engine::betting_loop::{BettingLoop, LoopConfig, LoopContext};
use roundwager::engine::executor::TransactionExecutor;
use roundwager::engine::heartbeat::Heartbeat;
use roundwager::engine::settlement::SettlementWorker;
use roundwager::feeds::binance::BinanceTicker;
use roundwager::feeds::chainlink::ChainlinkFeed;
use roundwager::feeds::{FeedPair, PriceSampler};
use roundwager::ledger::evm::EvmLedger;
use roundwager::ledger::RoundReader;
use roundwager::notify::{LogNotifier, Notifier, TelegramNotifier};
use roundwager::storage::PositionStore;
use roundwager::strategy::admission::AdmissionController;
use roundwager::strategy::kelly::StakeSizer;
use roundwager::strategy::Strategy;

const DEFAULT_CONFIG: &str = "config.toml";

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, config_path) = parse_args(&args);

    let cfg = AppConfig::load(config_path)?;
    init_logging();

    match command {
        Command::Run => run(cfg).await,
        Command::Report => report(cfg).await,
    }
}

fn parse_args(args: &[String]) -> (Command, &str) {
    match args.first().map(String::as_str) {
        Some("report") => (
            Command::Report,
            args.get(1).map(String::as_str).unwrap_or(DEFAULT_CONFIG),
        ),
        Some(path) => (Command::Run, path),
        None => (Command::Run, DEFAULT_CONFIG),
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

async fn run(cfg: AppConfig) -> Result<()> {
    info!(
        agent_name = %cfg.agent.name,
        live = cfg.agent.live,
        claim = cfg.agent.claim,
        contract = %cfg.ledger.prediction_contract,
        "ROUNDWAGER starting up"
    );
    if !cfg.agent.live {
        warn!("Dry run: transactions are logged, never sent");
    }

    // -- Chain and feeds -------------------------------------------------

    let ledger = Arc::new(EvmLedger::connect(&cfg.evm_settings(), &cfg.private_key()?).await?);
    let account = ledger.account();

    let exchange = BinanceTicker::new(
        cfg.feeds.exchange_base_url.clone(),
        &cfg.feeds.symbol,
        Duration::from_secs(cfg.feeds.timeout_secs),
    )?;
    let oracle = ChainlinkFeed::connect(
        &cfg.ledger.rpc_url,
        &cfg.ledger.oracle_contract,
        Duration::from_secs(cfg.ledger.call_timeout_secs),
    )
    .await?;
    let sampler: Arc<dyn PriceSampler> =
        Arc::new(FeedPair::new(Box::new(exchange), Box::new(oracle)));

    // -- Strategy --------------------------------------------------------

    let mut sizer = StakeSizer::new(cfg.sizing_config());
    let contract_min = ledger
        .min_bet_amount()
        .await
        .context("Failed to read contract minimum bet")?;
    sizer.apply_contract_minimum(contract_min)?;
    info!(
        min_bet = %sizer.config().min_bet_size,
        max_bet = %sizer.config().max_bet_size,
        mode = ?sizer.config().mode,
        "Stake sizing configured"
    );
    let strategy = Strategy::new(AdmissionController::new(cfg.admission_config()), sizer);

    // -- Collaborators ---------------------------------------------------

    let notifier = build_notifier(&cfg)?;
    let store = PositionStore::connect(&cfg.storage.database_url).await?;
    let executor = Arc::new(TransactionExecutor::new(
        cfg.executor_config(account.clone()),
        ledger.clone(),
        ledger.clone(),
    ));
    executor
        .sync_nonce()
        .await
        .context("Failed to read account nonce")?;
    let receipt_timeout = Duration::from_secs(cfg.agent.receipt_timeout_secs);

    let (refresher, balance) = BalanceRefresher::new(
        ledger.clone(),
        BalanceConfig {
            refresh_interval: Duration::from_secs(cfg.agent.balance_refresh_secs),
            gas_reserve: cfg.params.gas_reserve,
            balance_override: cfg.params.balance_override,
        },
    );
    if let Err(e) = refresher.refresh().await {
        warn!(error = %e, "Initial balance refresh failed, betting waits for the next one");
    }

    // -- Background tasks ------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    tasks.spawn(refresher.run(shutdown_rx.clone()));
    tasks.spawn(
        Heartbeat::new(
            cfg.agent.name.clone(),
            Duration::from_secs(cfg.agent.heartbeat_secs),
            ledger.clone(),
            notifier.clone(),
            balance.clone(),
        )
        .run(shutdown_rx.clone()),
    );

    // -- Betting loop ----------------------------------------------------

    let loop_config = LoopConfig {
        tick_interval: Duration::from_millis(cfg.agent.tick_interval_ms),
        error_backoff: Duration::from_millis(cfg.agent.error_backoff_ms),
        receipt_timeout,
        settlement_lag: cfg.agent.settlement_lag,
        ..LoopConfig::default()
    };
    let mut betting_loop = BettingLoop::new(
        loop_config,
        strategy,
        LoopContext {
            reader: ledger.clone(),
            sampler,
            executor: executor.clone(),
            store: store.clone(),
            notifier: notifier.clone(),
            balance: balance.clone(),
        },
    );
    if cfg.agent.claim {
        betting_loop = betting_loop.with_settlement(Arc::new(SettlementWorker::new(
            ledger.clone(),
            executor,
            store.clone(),
            notifier,
            receipt_timeout,
        )));
    }

    if cfg.status.enabled {
        let state = Arc::new(StatusState::new(
            cfg.agent.name.clone(),
            betting_loop.subscribe(),
            balance,
            store,
        ));
        spawn_status_server(state, cfg.status.port, shutdown_rx.clone()).await?;
    }

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown signal received.");
        let _ = shutdown_tx.send(true);
    });

    info!(account = %account, "Entering betting loop. Press Ctrl+C to stop.");
    betting_loop.run(shutdown_rx).await;

    while tasks.join_next().await.is_some() {}
    info!("ROUNDWAGER shut down cleanly.");
    Ok(())
}

/// Telegram when both env vars named in `[alerts]` resolve, otherwise logs.
fn build_notifier(cfg: &AppConfig) -> Result<Arc<dyn Notifier>> {
    let token = cfg
        .alerts
        .telegram_bot_token_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());
    let chat_id = cfg
        .alerts
        .telegram_chat_id_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());

    match (token, chat_id) {
        (Some(token), Some(chat_id)) => {
            info!("Telegram notifications enabled");
            Ok(Arc::new(TelegramNotifier::new(
                secrecy::SecretString::new(token),
                chat_id,
                None,
            )?))
        }
        _ => {
            info!("No Telegram credentials, notifications go to the log");
            Ok(Arc::new(LogNotifier))
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

async fn report(cfg: AppConfig) -> Result<()> {
    let ledger = EvmLedger::connect(&cfg.evm_settings(), &cfg.private_key()?).await?;
    let store = PositionStore::connect(&cfg.storage.database_url).await?;

    let report = Accountant::review(&store, &ledger).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &PerformanceReport) {
    println!(
        "{:>8}  {:>5}  {:>10}  {:>10}  {:>7}  {:>6}  {:>10}",
        "epoch", "side", "stake", "status", "result", "odds", "pnl"
    );
    for row in &report.rows {
        println!(
            "{:>8}  {:>5}  {:>10}  {:>10}  {:>7}  {:>6}  {:>10}",
            row.epoch,
            row.direction.to_string(),
            row.stake.round_dp(4).to_string(),
            format!("{:?}", row.status),
            row.result.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            row.odds
                .map(|o| o.round_dp(2).to_string())
                .unwrap_or_else(|| "-".into()),
            row.pnl
                .map(|p| p.round_dp(4).to_string())
                .unwrap_or_else(|| "-".into()),
        );
    }
    println!();
    println!(
        "bets {}  wins {}  losses {}  unresolved {}  failed {}",
        report.bets, report.wins, report.losses, report.unresolved, report.failed
    );
    println!(
        "win rate {:.1}%  staked {}  net pnl {}",
        report.win_rate * rust_decimal::Decimal::ONE_HUNDRED,
        report.staked.round_dp(4),
        report.net_pnl.round_dp(4)
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("roundwager=info"));

    let json_logging = std::env::var("ROUNDWAGER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
