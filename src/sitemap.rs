use std::collections::{HashSet, VecDeque};

use anyhow::{Context, Result};
use quick_xml::events::Event;
use regex::Regex;
use tracing::{info, warn};

/// Upper bound on sitemap documents fetched per run, index children included.
const MAX_SITEMAPS: usize = 50;

/// What one sitemap document points at: page URLs from a `<urlset>`,
/// nested sitemaps from a `<sitemapindex>`.
#[derive(Debug, Default, PartialEq)]
struct Listing {
    pages: Vec<String>,
    children: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Entry {
    Outside,
    Page,
    Child,
}

/// Fetch each sitemap (following index files) and return the page URLs it
/// lists, optionally filtered by `pattern`. A sitemap that cannot be fetched
/// or parsed is skipped with a warning.
pub async fn expand(sitemaps: &[String], pattern: Option<&Regex>) -> Vec<String> {
    let client = reqwest::Client::new();
    let mut queue: VecDeque<String> = sitemaps.iter().cloned().collect();
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    while let Some(sitemap) = queue.pop_front() {
        if !seen.insert(sitemap.clone()) {
            continue;
        }
        if seen.len() > MAX_SITEMAPS {
            warn!("Sitemap limit of {} reached, ignoring the rest", MAX_SITEMAPS);
            break;
        }

        match fetch_listing(&client, &sitemap).await {
            Ok(listing) => {
                let total = listing.pages.len();
                let kept = filter(listing.pages, pattern);
                info!(
                    "Sitemap {}: {} URLs ({} kept), {} nested sitemaps",
                    sitemap,
                    total,
                    kept.len(),
                    listing.children.len()
                );
                urls.extend(kept);
                queue.extend(listing.children);
            }
            Err(e) => warn!("Skipping sitemap {}: {:#}", sitemap, e),
        }
    }

    urls
}

async fn fetch_listing(client: &reqwest::Client, sitemap: &str) -> Result<Listing> {
    info!("Fetching sitemap: {}", sitemap);
    let xml = client
        .get(sitemap)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .context("Failed to read sitemap body")?;
    parse_listing(&xml)
}

fn filter(urls: Vec<String>, pattern: Option<&Regex>) -> Vec<String> {
    match pattern {
        Some(re) => urls.into_iter().filter(|u| re.is_match(u)).collect(),
        None => urls,
    }
}

fn parse_listing(xml: &str) -> Result<Listing> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut listing = Listing::default();
    let mut entry = Entry::Outside;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).context("Malformed sitemap XML")? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"url" => entry = Entry::Page,
                b"sitemap" => entry = Entry::Child,
                b"loc" => in_loc = entry != Entry::Outside,
                _ => {}
            },
            Event::Text(e) if in_loc => {
                let loc = e.unescape()?;
                let loc = loc.trim();
                match entry {
                    _ if loc.is_empty() => {}
                    Entry::Page => listing.pages.push(loc.to_string()),
                    Entry::Child => listing.children.push(loc.to_string()),
                    Entry::Outside => {}
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"url" | b"sitemap" => entry = Entry::Outside,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(listing)
}
