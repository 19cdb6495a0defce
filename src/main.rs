mod crawler;
mod extract;
mod fetch;
mod input;
mod record;
mod scoring;
mod sitemap;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use regex::Regex;
use tracing::info;

use crate::crawler::RunConfig;
use crate::fetch::{FetchOptions, HttpFetcher, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};
use crate::input::{Input, InputError, Settings, StartUrl, DEFAULT_CONCURRENCY};
use crate::record::REPORT_KEY;

#[derive(Parser)]
#[command(name = "page_pulse", about = "Single-pass page scraper with content scoring")]
struct Cli {
    /// SQLite file holding the dataset and key-value store
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, extract and score every start URL
    Run {
        /// Input JSON document
        #[arg(short, long, default_value = "INPUT.json")]
        input: PathBuf,
        /// Extra start URL (repeatable)
        #[arg(short, long = "url")]
        urls: Vec<String>,
        /// Cap on URLs processed
        #[arg(short = 'n', long)]
        max_items: Option<usize>,
        /// Skip the analytics block on records
        #[arg(long)]
        no_analytics: bool,
        /// Simultaneous fetches
        #[arg(short, long)]
        concurrency: Option<usize>,
    },
    /// Print the stored run report
    Report,
    /// Print dataset items as JSON lines
    Export {
        /// Emit one JSON array instead of lines
        #[arg(long)]
        array: bool,
        /// Max items to print
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show dataset counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::from_env();
    info!(settings = ?settings, "Starting page_pulse");

    let db_path = cli
        .db
        .or_else(|| settings.db_path.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(store::DEFAULT_DB_PATH));

    let result = match cli.command {
        Commands::Run {
            input,
            urls,
            max_items,
            no_analytics,
            concurrency,
        } => {
            let mut input = Input::load(&input)?;
            input
                .start_urls
                .extend(urls.into_iter().map(StartUrl::Plain));
            if let Some(n) = max_items {
                input.max_items = n;
            }
            if no_analytics {
                input.enable_analytics = false;
            }
            if concurrency.is_some() {
                input.max_concurrency = concurrency;
            }
            input.validate()?;
            info!(output_format = %input.output_format, "Input accepted");

            let mut start_urls = input.normalized_start_urls();
            if !input.sitemap_urls.is_empty() {
                let pattern = input
                    .sitemap_pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(InputError::from)?;
                start_urls.extend(sitemap::expand(&input.sitemap_urls, pattern.as_ref()).await);
            }

            let config = RunConfig {
                max_items: input.max_items,
                enable_analytics: input.enable_analytics,
                max_concurrency: input
                    .max_concurrency
                    .or(settings.max_concurrency)
                    .unwrap_or(DEFAULT_CONCURRENCY),
                fetch: FetchOptions {
                    timeout_secs: settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
                    max_retries: settings.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                    proxy: input.proxy_configuration.clone(),
                },
                show_progress: true,
            };

            let conn = store::connect(&db_path)?;
            store::init_schema(&conn)?;
            let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);

            println!(
                "Processing {} URLs, max {} items...",
                start_urls.len(),
                config.max_items
            );
            let report = crawler::run(&conn, fetcher, &start_urls, &config).await?;
            println!(
                "Completed! Processed {} items, {} successful ({:.1}%).",
                report.summary.total_processed,
                report.summary.successful_extractions,
                report.summary.success_rate
            );
            Ok(())
        }
        Commands::Report => {
            let conn = store::connect(&db_path)?;
            store::init_schema(&conn)?;
            match store::get_value(&conn, REPORT_KEY)? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("No report stored. Run 'run' first."),
            }
            Ok(())
        }
        Commands::Export { array, limit } => {
            let conn = store::connect(&db_path)?;
            store::init_schema(&conn)?;
            let items = store::fetch_items(&conn, limit)?;
            if array {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for item in &items {
                    println!("{}", serde_json::to_string(item)?);
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = store::connect(&db_path)?;
            store::init_schema(&conn)?;
            let s = store::get_stats(&conn)?;
            println!("Items:  {}", s.total);
            println!("OK:     {}", s.ok);
            println!("Errors: {}", s.errors);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
