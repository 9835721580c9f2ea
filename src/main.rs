//! Polymarket auto-trading bot CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use polybot::auth::{
    derive_credentials_with_fallback, resolve_order_identity, AuthStoryBuilder, CredCache,
    DerivationResult, IdentityParams, L1AuthChoice, SummaryGate,
};
use polybot::config::Config;
use polybot::services::clob::ClobClient;
use polybot::services::reauth::ReauthGateway;
use polybot::services::positions::{DataApiSource, PositionTracker};
use polybot::services::redeem::{BuilderCredentials, RelayRedeemer};
use polybot::strategies::{
    AutoRedeemStrategy, EndgameSweepStrategy, HedgingStrategy, ProfitTakingStrategy,
    StopLossStrategy, Strategy,
};
use polybot::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polybot")]
#[command(about = "Automated trading bot for Polymarket prediction markets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop continuously
    Run,

    /// Resolve API credentials and print the full auth story
    AuthCheck,

    /// Show current open positions
    Positions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env()?;

    match cli.command {
        Commands::Run => run_bot(&config).await?,
        Commands::AuthCheck => auth_check(&config).await?,
        Commands::Positions => show_positions(&config).await?,
    }

    Ok(())
}

/// Build the CLOB client and walk the credential fallback ladder
async fn authenticate(
    config: &Config,
) -> Result<(Arc<ClobClient>, IdentityParams, DerivationResult, AuthStoryBuilder)> {
    let key = config
        .private_key
        .as_deref()
        .context("POLYMARKET_PRIVATE_KEY is not set")?;
    let signer = key
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid private key"))?;

    let client = Arc::new(ClobClient::new(&config.clob_host, config.chain_id, signer)?);

    let params = IdentityParams {
        signer_address: client.signer_address(),
        funder_address: config.funder_address.clone(),
        wallet_mode: config.wallet_mode,
        signature_type: config.signature_type,
        force_l1_auth: parse_l1_choice(config.force_l1_auth.as_deref()),
    };

    let cache = CredCache::new(&config.cred_cache_path);
    let mut story = AuthStoryBuilder::new(&config.clob_host, config.chain_id);
    let result = derive_credentials_with_fallback(client.as_ref(), &params, &cache, &mut story).await;

    Ok((client, params, result, story))
}

fn parse_l1_choice(value: Option<&str>) -> Option<L1AuthChoice> {
    match value {
        Some(v) if v.eq_ignore_ascii_case("signer") => Some(L1AuthChoice::Signer),
        Some(v) if v.eq_ignore_ascii_case("effective") => Some(L1AuthChoice::Effective),
        Some(v) => {
            warn!("[Config] Unknown FORCE_L1_AUTH value '{}', ignoring", v);
            None
        }
        None => None,
    }
}

async fn run_bot(config: &Config) -> Result<()> {
    let (client, params, result, story) = authenticate(config).await?;

    // The gate prints the full story on the first evaluation and on any
    // later auth-ok transition, keeping steady-state logs quiet
    let mut summary_gate = SummaryGate::new();
    if summary_gate.should_print(result.success) {
        story.print_summary();
    }

    if !result.success {
        anyhow::bail!(
            "Credential derivation failed: {}",
            result.error.as_deref().unwrap_or("unknown")
        );
    }

    let creds = result
        .creds
        .clone()
        .context("Derivation succeeded without credentials")?;
    let signature_type = result
        .signature_type
        .context("Derivation succeeded without a signature type")?;
    let order_identity = resolve_order_identity(&params, signature_type);
    let effective_address = order_identity.effective_address.clone();
    client.set_session(creds, order_identity).await;

    info!(
        "[Main] Authenticated as {} ({}, cached: {})",
        effective_address,
        signature_type,
        result.from_cache
    );

    let tracker = Arc::new(PositionTracker::new(Arc::new(DataApiSource::new(
        &config.data_api_host,
        &effective_address,
    ))));

    // Strategies submit through the reauth gateway: a mid-run 401 from a
    // signed call triggers one re-derivation and a session reinstall
    // instead of failing every order until restart
    let gateway = Arc::new(ReauthGateway::new(
        client.clone(),
        params,
        CredCache::new(&config.cred_cache_path),
        &config.clob_host,
        config.chain_id,
        summary_gate,
    ));

    let mut strategies: Vec<Arc<dyn Strategy>> = Vec::new();

    match builder_credentials(config) {
        Some(builder_creds) => {
            let signer = config
                .private_key
                .as_deref()
                .unwrap_or_default()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid private key"))?;
            let redeemer = Arc::new(RelayRedeemer::new(
                signer,
                &effective_address,
                builder_creds,
            ));
            strategies.push(Arc::new(AutoRedeemStrategy::new(
                config.auto_redeem.clone(),
                redeemer,
                gateway.clone(),
            )));
        }
        None => {
            warn!("[Main] Builder credentials missing, auto-redeem disabled");
        }
    }

    strategies.push(Arc::new(HedgingStrategy::new(
        config.hedging.clone(),
        gateway.clone(),
    )));
    strategies.push(Arc::new(StopLossStrategy::new(
        config.stop_loss.clone(),
        gateway.clone(),
    )));
    strategies.push(Arc::new(ProfitTakingStrategy::new(
        config.profit_taking.clone(),
        gateway.clone(),
    )));
    strategies.push(Arc::new(EndgameSweepStrategy::new(
        config.endgame_sweep.clone(),
        gateway.clone(),
    )));

    let orchestrator = Orchestrator::new(
        tracker,
        strategies,
        Duration::from_secs(config.cycle_interval_seconds),
    );
    orchestrator.run().await
}

fn builder_credentials(config: &Config) -> Option<BuilderCredentials> {
    Some(BuilderCredentials {
        api_key: config.builder_api_key.clone()?,
        secret: config.builder_secret.clone()?,
        passphrase: config.builder_passphrase.clone()?,
    })
}

async fn auth_check(config: &Config) -> Result<()> {
    println!("\n{}", "=".repeat(70));
    println!("  AUTH CHECK");
    println!("  CLOB: {} | Chain: {}", config.clob_host, config.chain_id);
    println!("{}\n", "=".repeat(70));

    let (_client, _params, result, mut story) = authenticate(config).await?;
    if builder_credentials(config).is_none() {
        story.set_onchain_blocked("builder credentials not configured");
    }

    let check = |ok: bool| {
        if ok {
            "ok".green()
        } else {
            "FAIL".red()
        }
    };

    println!("  [{}] credential derivation", check(result.success));
    println!(
        "  [{}] signature type: {}",
        check(result.signature_type.is_some()),
        result
            .signature_type
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "  source: {}",
        if result.from_cache { "cache" } else { "ladder" }
    );
    println!();

    story.print_summary();

    if !result.success {
        if let Some(error) = &result.error {
            eprintln!("\n{} {}", "Auth failed:".red().bold(), error);
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn show_positions(config: &Config) -> Result<()> {
    // The data API is public; no credential derivation needed here
    let key = config
        .private_key
        .as_deref()
        .context("POLYMARKET_PRIVATE_KEY is not set")?;
    let signer: alloy::signers::local::PrivateKeySigner = key
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid private key"))?;
    let user_address = config
        .funder_address
        .clone()
        .unwrap_or_else(|| format!("{:?}", signer.address()));

    let tracker = PositionTracker::new(Arc::new(DataApiSource::new(
        &config.data_api_host,
        &user_address,
    )));
    tracker.refresh().await?;
    let positions = tracker.positions();

    println!("\n{} open positions for {}\n", positions.len(), user_address);
    for p in positions.iter() {
        let pnl = p.pnl_pct() * rust_decimal::Decimal::from(100);
        let pnl_str = if pnl.is_sign_negative() {
            format!("{:.1}%", pnl).red()
        } else {
            format!("+{:.1}%", pnl).green()
        };
        println!(
            "  {} {} {} @ {} (now {}, {}){}",
            p.side,
            p.size,
            p.question,
            p.entry_price,
            p.current_price,
            pnl_str,
            if p.redeemable { " [redeemable]" } else { "" }
        );
    }
    Ok(())
}
