use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tax_cli::app;
use tax_cli::config::{AppConfig, Overrides};
use tax_core::{CustomerType, ModelError, TaxConditions, TaxRepository, TaxService};

// ─── CLI definition ──────────────────────────────────────────────────────────

/// Tax rule resolution and Turkish tax number checks.
///
/// Database commands open the configured backend, migrating and seeding it
/// on first use.
#[derive(Debug, Parser)]
#[command(name = "tax", version)]
struct Cli {
    /// TOML file with `[database]` and `[cache]` tables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database backend to use.
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Database connection string.
    /// For SQLite this is a file path (e.g. `tax.db`) or `:memory:`.
    #[arg(long, global = true)]
    db: Option<String>,

    /// Cache TTL in seconds.
    #[arg(long, global = true)]
    cache_ttl: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve tax for an amount.
    Calculate(CalculateArgs),
    /// Check a TCKN (11 digits) or VKN (10 digits).
    Validate { number: String },
    /// Print a TCKN or VKN in grouped form.
    Format { number: String },
    /// List active tax classes.
    Classes,
    /// List tax rates for a country.
    Rates {
        /// Active Turkish rates only (served from the cache).
        #[arg(long)]
        turkish: bool,

        #[arg(long, default_value = "TR", conflicts_with = "turkish")]
        country: String,
    },
}

#[derive(Debug, Args)]
struct CalculateArgs {
    #[arg(long)]
    amount: Decimal,

    /// `type` or `type:id`, e.g. `product:42`.
    #[arg(long)]
    entity: Option<String>,

    #[arg(long)]
    country: Option<String>,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    postal_code: Option<String>,

    /// `individual` or `company`.
    #[arg(long)]
    customer_type: Option<String>,

    #[arg(long)]
    order_amount: Option<Decimal>,

    /// Allow export-only rules.
    #[arg(long)]
    export: bool,

    /// Evaluation date, YYYY-MM-DD. Defaults to today (UTC).
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Tax class code whose default rate applies when no rule matches.
    #[arg(long)]
    fallback_class: Option<String>,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

impl CalculateArgs {
    fn conditions(&self) -> Result<TaxConditions, ModelError> {
        let entity = self.entity.as_deref().map(app::parse_entity).transpose()?;
        let customer_type = self
            .customer_type
            .as_deref()
            .map(|s| CustomerType::parse(s).ok_or_else(|| ModelError::UnknownCustomerType(s.to_string())))
            .transpose()?;

        Ok(TaxConditions {
            entity,
            country_code: self.country.clone(),
            region: self.region.clone(),
            postal_code: self.postal_code.clone(),
            customer_type,
            order_amount: self.order_amount,
            is_export: self.export,
            evaluation_date: self.date,
        })
    }
}

// ─── tracing ─────────────────────────────────────────────────────────────────

/// Initialise the tracing subscriber.
///
/// * Honours `RUST_LOG` when set.
/// * Falls back to `info` so normal runs are quiet.
/// * Strips timestamps and target names to keep CLI output clean.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::from("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

// ─── commands ────────────────────────────────────────────────────────────────

async fn calculate(service: &TaxService, args: &CalculateArgs) -> anyhow::Result<()> {
    let conditions = args.conditions().context("Invalid calculation conditions")?;

    let fallback = match &args.fallback_class {
        Some(code) => Some(
            service
                .repository()
                .get_tax_class_by_code(code)
                .await
                .with_context(|| format!("Failed to load tax class '{code}'"))?,
        ),
        None => None,
    };

    let result = service
        .calculate_tax(args.amount, &conditions, fallback.as_ref())
        .await?;
    debug!(applied = result.applied_rules.len(), "calculation finished");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", app::ResultReport(&result));
    }
    Ok(())
}

fn validate(number: &str) -> anyhow::Result<()> {
    let check = app::check_tax_number(number);
    let Some(kind) = check.kind else {
        anyhow::bail!("'{number}' is neither an 11-digit TCKN nor a 10-digit VKN");
    };
    if !check.valid {
        anyhow::bail!("{} is not a valid {} tax number", check.formatted, kind.as_str());
    }
    println!("{} is a valid {} tax number", check.formatted, kind.as_str());
    Ok(())
}

// ─── entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    // number checks never touch the database
    match &cli.command {
        Command::Validate { number } => return validate(number),
        Command::Format { number } => {
            println!("{}", app::check_tax_number(number).formatted);
            return Ok(());
        }
        _ => {}
    }

    let config = AppConfig::resolve(
        cli.config.as_deref(),
        Overrides {
            backend: cli.backend,
            db: cli.db,
            cache_ttl: cli.cache_ttl,
        },
    )?;
    info!(
        backend = %config.database.backend,
        database = %config.database.connection_string,
        "opening tax database"
    );
    let service = app::connect(&config).await?;

    match &cli.command {
        Command::Calculate(args) => calculate(&service, args).await?,
        Command::Classes => print!("{}", app::ClassTable(&service.tax_classes().await?)),
        Command::Rates { turkish: true, .. } => {
            print!("{}", app::RateTable(&service.turkish_rates().await?))
        }
        Command::Rates { country, .. } => {
            let rates = service.repository().list_tax_rates_by_country(country).await?;
            print!("{}", app::RateTable(&rates));
        }
        Command::Validate { .. } | Command::Format { .. } => {}
    }

    Ok(())
}
