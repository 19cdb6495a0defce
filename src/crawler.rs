use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::extract::{build_record, extract};
use crate::fetch::{FetchError, FetchOptions, Fetcher};
use crate::input::{normalize_urls, InputError, DEFAULT_CONCURRENCY, DEFAULT_MAX_ITEMS};
use crate::record::{ErrorRecord, ExtractedRecord, Record, RunReport, REPORT_KEY};
use crate::store;

/// Options for one crawl run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub max_items: usize,
    pub enable_analytics: bool,
    pub max_concurrency: usize,
    pub fetch: FetchOptions,
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            max_items: DEFAULT_MAX_ITEMS,
            enable_analytics: true,
            max_concurrency: DEFAULT_CONCURRENCY,
            fetch: FetchOptions::default(),
            show_progress: false,
        }
    }
}

/// Why a single URL produced an error record.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("extraction failed for {url}: {reason}")]
    Extraction { url: String, reason: String },
}

/// Run totals. Only the consumer loop mutates these.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunCounters {
    pub total_processed: usize,
    pub successful_extractions: usize,
}

impl RunCounters {
    fn success(&mut self) {
        self.total_processed += 1;
        self.successful_extractions += 1;
    }

    fn failure(&mut self) {
        self.total_processed += 1;
    }
}

struct Outcome {
    url: String,
    result: Result<ExtractedRecord, PageError>,
}

/// Fetch, extract and score every URL, appending one dataset item per URL
/// as it completes, then store and return the run report.
pub async fn run(
    conn: &Connection,
    fetcher: Arc<dyn Fetcher>,
    urls: &[String],
    config: &RunConfig,
) -> Result<RunReport> {
    let mut urls = normalize_urls(urls.iter().map(String::as_str));
    if urls.is_empty() {
        return Err(InputError::NoStartUrls.into());
    }
    if urls.len() > config.max_items {
        info!(
            "Limiting run to {} of {} URLs (maxItems)",
            config.max_items,
            urls.len()
        );
        urls.truncate(config.max_items);
    }

    let started = Instant::now();
    let total = urls.len();
    info!("Processing {} URLs, max {} items", total, config.max_items);

    let pb = if config.show_progress {
        ProgressBar::new(total as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Outcome>(config.max_concurrency.max(1) * 2);

    for url in urls.iter().cloned() {
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let options = config.fetch.clone();
        let analytics = config.enable_analytics;

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let result = process_url(fetcher.as_ref(), &url, &options, analytics).await;
            let _ = tx.send(Outcome { url, result }).await;
        });
    }

    // rx closes once every worker has sent or died
    drop(tx);

    let mut counters = RunCounters::default();
    let mut pending: HashSet<String> = urls.iter().cloned().collect();
    let mut insert = store::prepare_insert(conn)?;

    while let Some(Outcome { url, result }) = rx.recv().await {
        pending.remove(&url);
        match result {
            Ok(record) => {
                let record = Record::Extracted(Box::new(record));
                match store::save_item(&mut insert, &record) {
                    Ok(()) => {
                        counters.success();
                        info!("Data extracted from {}", url);
                    }
                    Err(e) => {
                        warn!("Failed to store record for {}: {}", url, e);
                        let fallback = Record::Error(ErrorRecord::new(&url, e.to_string()));
                        store::save_item(&mut insert, &fallback)?;
                        counters.failure();
                    }
                }
            }
            Err(e) => {
                error!("Failed to process {}: {}", url, e);
                store::save_item(&mut insert, &Record::Error(ErrorRecord::new(&url, e.to_string())))?;
                counters.failure();
            }
        }
        pb.inc(1);
    }

    for url in pending {
        error!("Worker for {} ended without a result", url);
        store::save_item(
            &mut insert,
            &Record::Error(ErrorRecord::new(&url, "worker task ended without a result")),
        )?;
        counters.failure();
    }
    drop(insert);
    pb.finish_and_clear();

    let report = RunReport::new(
        counters.total_processed,
        counters.successful_extractions,
        started.elapsed().as_millis() as u64,
    );
    store::set_value(conn, REPORT_KEY, &report)?;
    info!(
        "Completed: processed {} items, {} successful ({:.1}%)",
        counters.total_processed, counters.successful_extractions, report.summary.success_rate
    );

    Ok(report)
}

async fn process_url(
    fetcher: &dyn Fetcher,
    url: &str,
    options: &FetchOptions,
    enable_analytics: bool,
) -> Result<ExtractedRecord, PageError> {
    let started = Instant::now();
    info!("Processing: {}", url);

    let page = fetcher.fetch(url, options).await?;
    debug!(url, final_url = %page.url, status = page.status, "fetched");
    if !page.is_html() {
        return Err(PageError::Extraction {
            url: url.to_string(),
            reason: format!(
                "unsupported content type {}",
                page.content_type.as_deref().unwrap_or("")
            ),
        });
    }

    let fields = {
        let document = page.parse();
        extract(url, &document)
    };
    debug!(url, headings = fields.headings.len(), links = fields.link_count, "extracted");

    Ok(build_record(fields, enable_analytics, started))
}
