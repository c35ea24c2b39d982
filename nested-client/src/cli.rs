use std::{fs::File, io::Read, str::FromStr};

use alloy_primitives::{Address, U256};
use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use nested_common::{
    budget::{compute_budgets, Price},
    models::{AggregatorId, Chain, Holding, QuoteRequest},
};
use num_bigint::BigInt;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{config::ClientConfig, selector::AggregatorSelector, sources};

/// Nested Client CLI - Quotes swaps against the supported price aggregators
///
/// The `quote` command asks every enabled aggregator and prints the best answer. The `allocate`
/// command splits a deposit or withdrawal budget over the holdings of a portfolio.
#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct CliArgs {
    /// Path to a YAML client configuration. Defaults apply to every missing field.
    #[clap(long, global = true, env = "NESTED_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging. Logs go to stderr, results to stdout.
    #[clap(long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Fetches the best quote for a swap.
    Quote(QuoteArgs),
    /// Computes the budget of each holding from a JSON file of holdings and prices.
    Allocate(AllocateArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
struct QuoteArgs {
    /// The blockchain to quote on
    #[clap(short = 'c', long, default_value = "eth")]
    chain: String,

    /// Token to spend
    #[clap(long)]
    sell: Address,

    /// Token to receive
    #[clap(long)]
    buy: Address,

    /// Exact amount of `sell` to spend, in the token's smallest unit.
    #[clap(long, conflicts_with = "buy_amount", required_unless_present = "buy_amount")]
    sell_amount: Option<U256>,

    /// Exact amount of `buy` to receive, in the token's smallest unit.
    #[clap(long)]
    buy_amount: Option<U256>,

    /// Accepted slippage, e.g. 0.03 for 3%.
    #[clap(long, default_value = "0.01")]
    slippage: f64,

    /// Aggregators to leave out, on top of the configured exclusions.
    #[clap(short = 'e', long)]
    exclude: Vec<AggregatorId>,
}

impl QuoteArgs {
    fn request(&self) -> anyhow::Result<QuoteRequest> {
        if !(0.0..1.0).contains(&self.slippage) {
            return Err(anyhow!("slippage must be within [0, 1)"));
        }
        let chain = Chain::from_str(&self.chain)
            .map_err(|_| anyhow!("Unknown chain {}", self.chain))?;
        match (self.sell_amount, self.buy_amount) {
            (Some(qty), None) => {
                Ok(QuoteRequest::spend(chain, self.sell, self.buy, self.slippage, qty))
            }
            (None, Some(qty)) => {
                Ok(QuoteRequest::bought(chain, self.sell, self.buy, self.slippage, qty))
            }
            _ => Err(anyhow!("Exactly one of sell-amount and buy-amount must be set")),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
struct AllocateArgs {
    /// JSON file with `budget`, `holdings` and `prices`.
    #[clap(long)]
    input: String,
}

/// Input of the `allocate` command. A negative budget describes a withdrawal.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllocateInput {
    budget: String,
    holdings: Vec<Holding>,
    prices: Vec<Price>,
}

impl AllocateInput {
    fn from_json(path: &str) -> anyhow::Result<Self> {
        let mut file = File::open(path).with_context(|| format!("Failed to open {path}"))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .with_context(|| format!("Failed to read {path}"))?;
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse {path}"))
    }

    fn allocate(&self) -> anyhow::Result<Vec<String>> {
        if self.holdings.len() != self.prices.len() {
            return Err(anyhow!("Expected one price per holding"));
        }
        let budget = BigInt::from_str(&self.budget)
            .with_context(|| format!("Invalid budget {}", self.budget))?;
        Ok(compute_budgets(&self.holdings, &self.prices, &budget)
            .iter()
            .map(ToString::to_string)
            .collect())
    }
}

async fn quote(mut config: ClientConfig, args: &QuoteArgs) -> anyhow::Result<()> {
    let request = args.request()?;
    config
        .excluded_aggregators
        .extend(args.exclude.iter().copied());
    let selector = AggregatorSelector::new(sources::from_config(&config, None)?);
    info!(sources = ?selector.source_ids(), ?request, "Quoting");

    let quote = selector.best_quote(&request).await?;
    println!("{}", serde_json::to_string_pretty(&quote)?);
    Ok(())
}

pub async fn run_cli() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("Failed to set up logging subscriber: {e}"))?;

    let config = match args.config.as_deref() {
        Some(path) => ClientConfig::from_yaml(path)?,
        None => ClientConfig::default(),
    };
    debug!(?config, "Loaded config");

    match &args.command {
        Command::Quote(quote_args) => quote(config, quote_args).await,
        Command::Allocate(allocate_args) => {
            let budgets = AllocateInput::from_json(&allocate_args.input)?.allocate()?;
            println!("{}", serde_json::to_string_pretty(&budgets)?);
            Ok(())
        }
    }
}
