use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use ticket_scrape::config::AppConfig;
use ticket_scrape::models::Category;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ticket marketplace snapshot collector")]
struct Cli {
    /// Path to a JSON config file. Environment variables override it.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every category and upload one snapshot.
    Collect {
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        country: Option<String>,
        /// Restrict to these categories (repeatable). Defaults to all.
        #[arg(long = "category", value_name = "NAME")]
        categories: Vec<String>,
    },
    /// Load all stored snapshots into the database.
    Ingest {
        /// Keep existing rows instead of dropping and recreating the tables.
        #[arg(long)]
        keep_existing: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Command::Collect {
            city,
            country,
            categories,
        } => {
            if let Some(city) = city {
                config.api.city = city;
            }
            if let Some(country) = country {
                config.api.country = country;
            }
            let categories = parse_categories(&categories)?;
            let report = ticket_scrape::run_collection(&config, &categories).map_err(|err| {
                tracing::error!(error = %format!("{err:#}"), "collection failed");
                err
            })?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ingest { keep_existing } => {
            let report = ticket_scrape::run_ingestion(&config, !keep_existing).map_err(|err| {
                tracing::error!(error = %format!("{err:#}"), "ingestion failed");
                err
            })?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn parse_categories(names: &[String]) -> Result<Vec<Category>> {
    if names.is_empty() {
        return Ok(Category::ALL.to_vec());
    }
    names
        .iter()
        .map(|name| Category::parse(name).ok_or_else(|| anyhow!("unknown category: {name}")))
        .collect()
}
