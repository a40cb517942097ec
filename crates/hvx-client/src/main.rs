//! HyperVIX client - Entry Point

use alloy::primitives::Address;
use anyhow::Result;
use clap::{Parser, Subcommand};
use hvx_chain::{RevertRegistry, RpcNetworkSwitcher, TxReceipt};
use hvx_client::Application;
use hvx_core::{Direction, Size};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// HyperVIX volatility perpetual client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via HVX_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep the cache in sync and log market and account changes
    Watch,
    /// Print the current market snapshot
    Snapshot,
    /// Print funding figures and the predicted next rate
    Funding,
    /// Print balance, allowance and position of an address (default: active account)
    Account { address: Option<Address> },
    /// Print recent trades, the price chart and the last settled funding rate
    History,
    /// Quote a trade and estimate leverage, liquidation price and fee
    Preview {
        #[arg(long, value_enum)]
        side: Side,
        #[command(flatten)]
        size: SizeArgs,
        /// Collateral to post (default: the contract's required margin)
        #[arg(long)]
        margin: Option<Decimal>,
    },
    /// Open or add to a position
    Open {
        #[arg(long, value_enum)]
        side: Side,
        #[command(flatten)]
        size: SizeArgs,
        /// Collateral to post
        #[arg(long)]
        margin: Decimal,
    },
    /// Close the whole position of the signing account
    Close,
    /// Liquidate another trader's position
    Liquidate { target: Address },
    /// Mint testnet collateral to the signing account
    Faucet { amount: Decimal },
    /// Switch the wallet to the configured network, adding it when unknown
    SwitchNetwork,
    /// Print Prometheus metrics gathered by this run
    Metrics,
}

/// Position size, given directly or as leverage on the posted margin.
#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct SizeArgs {
    #[arg(long)]
    size: Option<Decimal>,
    /// Size the trade so `margin` carries this leverage at the current mark
    #[arg(long, requires = "margin")]
    leverage: Option<Decimal>,
}

impl SizeArgs {
    async fn resolve(&self, app: &Application, margin: Option<Decimal>) -> Result<Size> {
        match (self.size, self.leverage, margin) {
            (Some(size), _, _) => Ok(Size::new(size)),
            (None, Some(leverage), Some(margin)) => {
                Ok(app.size_for_leverage(margin, leverage).await?)
            }
            _ => anyhow::bail!("--leverage needs --margin"),
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Side {
    Long,
    Short,
}

impl From<Side> for Direction {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => Direction::Long,
            Side::Short => Direction::Short,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_receipt(receipt: &TxReceipt) {
    println!("tx:      {}", receipt.tx_hash);
    println!("block:   {}", receipt.block_number.map_or("-".to_string(), |b| b.to_string()));
    println!("gas:     {}", receipt.gas_used);
    println!("success: {}", receipt.success);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    hvx_telemetry::init_logging()?;

    info!("Starting HyperVIX client v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > HVX_CONFIG env var > default
    let config = hvx_client::AppConfig::load(args.config)?;
    info!(
        chain_id = config.network.chain_id,
        rpc_url = %config.network.rpc_url,
        "Configuration loaded"
    );

    let mut app = Application::connect(config)?;

    match args.command {
        Command::Watch => app.run().await?,
        Command::Snapshot => print_json(app.snapshot().await?.as_ref())?,
        Command::Funding => print_json(&app.funding_info().await?)?,
        Command::Account { address } => {
            let address = address
                .or_else(|| app.active_account())
                .ok_or_else(|| anyhow::anyhow!("No address given and no active account"))?;
            let account = app.account(address).await?;
            print_json(account.as_ref())?;
            print_json(&account.portfolio())?;
        }
        Command::History => {
            print_json(&app.recent_trades().await?)?;
            print_json(&app.price_chart().await?)?;
            match app.last_settled_funding_rate().await? {
                Some(rate) => println!("last settled funding rate: {rate}"),
                None => println!("no funding settlement in the scanned range"),
            }
        }
        Command::Preview { side, size, margin } => {
            let size = size.resolve(&app, margin).await?;
            print_json(&app.preview(side.into(), size, margin).await?)?;
        }
        Command::Open { side, size, margin } => {
            let size = size.resolve(&app, Some(margin)).await?;
            let receipt = app.open_position(side.into(), size, margin).await?;
            print_receipt(&receipt);
        }
        Command::Close => print_receipt(&app.close_position().await?),
        Command::Liquidate { target } => print_receipt(&app.liquidate(target).await?),
        Command::Faucet { amount } => print_receipt(&app.request_faucet(amount).await?),
        Command::SwitchNetwork => {
            let switcher = RpcNetworkSwitcher::connect(
                app.config().wallet_rpc_url(),
                Arc::new(RevertRegistry::default()),
            )?;
            let outcome = app.switch_network(&switcher).await?;
            println!("{outcome:?}");
        }
        Command::Metrics => {
            app.snapshot().await?;
            println!("{}", hvx_telemetry::Metrics::render()?);
        }
    }

    app.shutdown();
    Ok(())
}
