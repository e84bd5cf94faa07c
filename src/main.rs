//! Stake orchestrator - batched staking workflows for validator operators
//!
//! Funds validator owner accounts from a sponsor, stakes their keys in
//! packed transactions and turns them into delegation contracts, confirming
//! each stage before starting the next.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use alloy_primitives::U256;
use stake_orchestrator::cancel::CancelToken;
use stake_orchestrator::chain::{ChainClient, GatewayProvider};
use stake_orchestrator::config::{LogFormat, Settings, Workflow};
use stake_orchestrator::coordination::report::TransactionReport;
use stake_orchestrator::coordination::{
    distribution_plan, stake_plan, unstake_plan, AccountPlan, WorkflowSequencer,
};
use stake_orchestrator::metrics::MetricsServer;
use stake_orchestrator::tx::{BatchPacker, ValueRule};
use stake_orchestrator::types::{parse_value, Address};
use stake_orchestrator::wallet::{Ed25519Signer, Keyring};

#[derive(Parser)]
#[command(name = "stake-orchestrator", version, about)]
struct Cli {
    /// Configuration file [default: $STAKE_ORCHESTRATOR_CONFIG or config/default.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Plan every stage and print the transactions without submitting
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fund owners, stake their validator keys and create delegation contracts
    Stake,
    /// Unstake validator keys from a delegation contract
    Unstake,
    /// Transfer a fixed value from the sponsor to a list of wallets
    Distribute,
}

impl Command {
    fn workflow(&self) -> Workflow {
        match self {
            Command::Stake => Workflow::Stake,
            Command::Unstake => Workflow::Unstake,
            Command::Distribute => Workflow::Distribute,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    // Initialize logging
    init_logging(settings.orchestrator.log_format);

    info!("Starting stake orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let workflow = cli.command.workflow();
    settings.validate(workflow)?;

    let client: Arc<dyn ChainClient> = Arc::new(GatewayProvider::new(&settings.gateway)?);

    // Reused for every transaction of the run
    let network = client
        .get_network_parameters()
        .await
        .context("Failed to fetch network configuration")?;
    info!(
        "Network {}: min gas price {}, tx version {}",
        network.chain_id, network.min_gas_price, network.version
    );

    let (keyring, sponsor, plans) = build_plans(&settings, workflow)?;
    info!("Prepared {} workflows ({} signers)", plans.len(), keyring.len());
    log_overview(client.as_ref(), sponsor.as_ref(), &plans).await?;

    let packer = BatchPacker::new(settings.gas.clone(), settings.limits.clone(), network);
    let (cancel_handle, cancel_token) = CancelToken::new();
    let sequencer = WorkflowSequencer::new(
        client.clone(),
        keyring,
        packer,
        settings.orchestrator.sequencer_settings(),
    )
    .with_cancel(cancel_token);
    info!("Run id {}", sequencer.run_id());

    if cli.dry_run {
        return print_plans(&sequencer, &plans).await;
    }

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let run = async {
        if settings.orchestrator.concurrent {
            match sequencer.run_concurrent(&plans).await {
                Ok(summary) => return summary,
                Err(e) => warn!("{}", e),
            }
        }
        sequencer.run_all(&plans).await
    };
    tokio::pin!(run);

    let finished = tokio::select! {
        summary = &mut run => Some(summary),
        _ = shutdown_signal() => None,
    };
    let summary = match finished {
        Some(summary) => summary,
        None => {
            warn!("Shutdown signal received, cancelling remaining stages");
            cancel_handle.cancel();
            run.await
        }
    };

    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.halted() {
        anyhow::bail!("Run {} halted before completing every workflow", summary.run_id);
    }

    info!("Run {} completed", summary.run_id);
    Ok(())
}

/// Load every signer and build the workflow plans
fn build_plans(
    settings: &Settings,
    workflow: Workflow,
) -> Result<(Keyring, Option<Address>, Vec<AccountPlan>)> {
    let mut keyring = Keyring::new();
    let mut plans = Vec::new();

    let sponsor = match (&settings.sponsor, workflow) {
        (Some(wallet), Workflow::Stake | Workflow::Distribute) => {
            let signer = Ed25519Signer::from_config(wallet).context("Failed to load sponsor")?;
            Some(keyring.insert(Arc::new(signer)))
        }
        _ => None,
    };

    match workflow {
        Workflow::Stake => {
            let sponsor = sponsor.as_ref().context("Stake workflow needs a sponsor")?;
            for (index, account) in settings.accounts.iter().enumerate() {
                let signer = Ed25519Signer::from_config(&account.wallet)
                    .with_context(|| format!("Failed to load wallet of account {}", index))?;
                let address = keyring.insert(Arc::new(signer));
                let info = account.stake_info(address)?;
                let params = settings.stake_params(account)?;
                plans.push(stake_plan(sponsor, &info, &params)?);
            }
        }
        Workflow::Unstake => {
            let unstake = settings.unstake.as_ref().context("Missing [unstake]")?;
            let signer = Ed25519Signer::from_config(&unstake.wallet)
                .context("Failed to load unstake owner")?;
            let owner = keyring.insert(Arc::new(signer));
            plans.push(unstake_plan(
                &owner,
                &Address::new(unstake.delegation_contract.clone()),
                &unstake.keys,
            )?);
        }
        Workflow::Distribute => {
            let sponsor = sponsor.as_ref().context("Distribute workflow needs a sponsor")?;
            let distribution = settings
                .distribution
                .as_ref()
                .context("Missing [distribution]")?;
            let wallets: Vec<Address> = distribution
                .wallets
                .iter()
                .map(|w| Address::new(w.clone()))
                .collect();
            plans.push(distribution_plan(
                sponsor,
                &wallets,
                parse_value(&distribution.value)?,
                &distribution.note,
            )?);
        }
    }

    Ok((keyring, sponsor, plans))
}

/// Total stake and total sponsor outflow of a run, saturating at `U256::MAX`
fn run_totals(sponsor: Option<&Address>, plans: &[AccountPlan]) -> (U256, U256) {
    let mut total_stake = U256::ZERO;
    let mut sponsor_outflow = U256::ZERO;

    for descriptor in plans.iter().flat_map(|p| &p.stages) {
        match &descriptor.value {
            ValueRule::Apportion { target, .. } => {
                total_stake = total_stake.saturating_add(*target)
            }
            ValueRule::Fixed(value) if Some(&descriptor.sender) == sponsor => {
                let count = U256::from(descriptor.operations.len() as u64);
                sponsor_outflow = sponsor_outflow.saturating_add(value.saturating_mul(count))
            }
            _ => {}
        }
    }

    (total_stake, sponsor_outflow)
}

/// Log the sponsor's balance against what the run will spend
async fn log_overview(
    client: &dyn ChainClient,
    sponsor: Option<&Address>,
    plans: &[AccountPlan],
) -> Result<()> {
    let (total_stake, sponsor_outflow) = run_totals(sponsor, plans);

    info!(
        "{} accounts, total stake {}, sponsor transfers {}",
        plans.len(),
        total_stake,
        sponsor_outflow
    );

    if let Some(sponsor) = sponsor {
        let account = client
            .get_account(sponsor)
            .await
            .context("Failed to query sponsor account")?;
        info!(
            "Sponsor {} balance {} (nonce {})",
            sponsor, account.balance, account.nonce
        );
        if account.balance < sponsor_outflow {
            warn!(
                "Sponsor balance {} does not cover transfers of {}",
                account.balance, sponsor_outflow
            );
        }
    }

    Ok(())
}

/// Plan every stage without submitting and print the result as JSON
async fn print_plans(sequencer: &WorkflowSequencer, plans: &[AccountPlan]) -> Result<()> {
    let mut ctx = sequencer.context();
    let mut output = Vec::new();

    for plan in plans {
        for (stage, descriptors) in plan.grouped() {
            let txs = sequencer.plan_stage(&mut ctx, stage, descriptors).await?;
            let transactions: Vec<serde_json::Value> = txs
                .iter()
                .map(|tx| {
                    serde_json::json!({
                        "summary": TransactionReport::from(tx),
                        "data": tx.data_string(),
                    })
                })
                .collect();
            output.push(serde_json::json!({
                "account": plan.account,
                "stage": stage,
                "transactions": transactions,
            }));
        }
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,stake_orchestrator=debug,reqwest=warn,hyper=warn")
    });

    // Logs go to stderr; stdout carries the run report
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
