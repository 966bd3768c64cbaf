use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tax_data::TaxDataLoader;
use tax_db_sqlite::SqliteRepository;
use tracing_subscriber::EnvFilter;

/// Load tax rates and tax rules from CSV files into the database.
///
/// Rates are matched to tax classes by `tax_class_code` and upserted by
/// `code`. Rules are matched to rates by `tax_rate_code` and always
/// inserted. When both files are given, rates are loaded first.
#[derive(Parser, Debug)]
#[command(name = "tax-data-loader")]
#[command(version, about, long_about = None)]
struct Args {
    /// CSV file of tax rates
    #[arg(short, long)]
    rates: Option<PathBuf>,

    /// CSV file of tax rules
    #[arg(short = 'u', long)]
    rules: Option<PathBuf>,

    /// SQLite database URL (e.g., sqlite:tax.db)
    #[arg(short, long, default_value = "sqlite:tax.db")]
    database: String,

    /// Run database migrations before loading data
    #[arg(short, long, default_value_t = false)]
    migrate: bool,

    /// Run seed files from the specified directory after migrations
    #[arg(short, long)]
    seeds: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .init();
}

fn open(path: &PathBuf) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    if args.rates.is_none() && args.rules.is_none() && !args.migrate && args.seeds.is_none() {
        anyhow::bail!("nothing to do: pass --rates, --rules, --migrate or --seeds");
    }

    let repo = SqliteRepository::new(&args.database)
        .await
        .with_context(|| format!("Failed to connect to database: {}", args.database))?;

    if args.migrate {
        println!("Running migrations...");
        repo.run_migrations()
            .await
            .context("Failed to run migrations")?;
        println!("Migrations complete.");
    }

    if let Some(seeds_dir) = &args.seeds {
        println!("Running seeds from: {}", seeds_dir.display());
        repo.run_seeds(seeds_dir)
            .await
            .with_context(|| format!("Failed to run seeds from: {}", seeds_dir.display()))?;
        println!("Seeds complete.");
    }

    if let Some(path) = &args.rates {
        println!("Loading tax rates from: {}", path.display());
        let records = TaxDataLoader::parse_rates(open(path)?)
            .with_context(|| format!("Failed to parse CSV: {}", path.display()))?;
        println!("Parsed {} records from CSV", records.len());

        let summary = TaxDataLoader::load_rates(&repo, &records)
            .await
            .context("Failed to load tax rates into database")?;
        println!(
            "Created {} and updated {} tax rates.",
            summary.created, summary.updated
        );
    }

    if let Some(path) = &args.rules {
        println!("Loading tax rules from: {}", path.display());
        let records = TaxDataLoader::parse_rules(open(path)?)
            .with_context(|| format!("Failed to parse CSV: {}", path.display()))?;
        println!("Parsed {} records from CSV", records.len());

        let inserted = TaxDataLoader::load_rules(&repo, &records)
            .await
            .context("Failed to load tax rules into database")?;
        println!("Successfully loaded {} tax rules into the database.", inserted);
    }

    Ok(())
}
