use std::sync::OnceLock;
use std::time::Instant;

use scraper::{ElementRef, Html, Selector};

use crate::record::{iso_now, ExtractedRecord, Metadata, PageFields, SCRAPER_VERSION};
use crate::scoring;

pub const MAX_CONTENT_CHARS: usize = 5000;

struct Selectors {
    title: Selector,
    headings: Selector,
    links: Selector,
    images: Selector,
    body: Selector,
    description: Selector,
}

fn selectors() -> &'static Selectors {
    static SEL: OnceLock<Selectors> = OnceLock::new();
    SEL.get_or_init(|| Selectors {
        title: Selector::parse("title").unwrap(),
        headings: Selector::parse("h1, h2, h3").unwrap(),
        links: Selector::parse("a").unwrap(),
        images: Selector::parse("img").unwrap(),
        body: Selector::parse("body").unwrap(),
        description: Selector::parse(r#"meta[name="description"]"#).unwrap(),
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Pull the top-level fields out of a parsed page. Missing elements
/// degrade to empty values.
pub fn extract(url: &str, document: &Html) -> PageFields {
    let sel = selectors();

    let title = document
        .select(&sel.title)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let headings = document.select(&sel.headings).map(element_text).collect();

    let content = document
        .select(&sel.body)
        .next()
        .map(|body| truncate_chars(body.text().collect::<String>().trim(), MAX_CONTENT_CHARS))
        .unwrap_or_default();

    let meta_description = document
        .select(&sel.description)
        .next()
        .and_then(|m| m.value().attr("content"))
        .unwrap_or_default()
        .to_string();

    PageFields {
        url: url.to_string(),
        title,
        headings,
        link_count: document.select(&sel.links).count(),
        image_count: document.select(&sel.images).count(),
        content,
        meta_description,
        timestamp: iso_now(),
    }
}

/// Cut on character count, not on a word boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Score the fields and attach metadata. Quality is computed before
/// analytics and metadata exist.
pub fn build_record(fields: PageFields, enable_analytics: bool, started: Instant) -> ExtractedRecord {
    let data_quality = scoring::data_quality(&fields);
    let analytics = enable_analytics.then(|| scoring::analytics(&fields));
    ExtractedRecord {
        fields,
        data_quality,
        analytics,
        metadata: Metadata {
            scraped_at: iso_now(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            scraper_version: SCRAPER_VERSION.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> Html {
        let html = std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap();
        Html::parse_document(&html)
    }

    #[test]
    fn article_fields() {
        let doc = fixture("article");
        let f = extract("https://example.com/post", &doc);
        assert_eq!(f.url, "https://example.com/post");
        assert_eq!(f.title, "Hello");
        assert_eq!(f.headings, vec!["Getting Started", "Install", "Configure"]);
        assert_eq!(f.link_count, 3);
        assert_eq!(f.image_count, 2);
        assert_eq!(f.meta_description, "A short guide to getting started.");
        assert!(f.content.starts_with("Getting Started"));
        assert!(f.content.ends_with("Read the docs."));
    }

    #[test]
    fn bare_page_degrades_to_defaults() {
        let doc = fixture("bare");
        let f = extract("https://example.com/bare", &doc);
        assert_eq!(f.title, "");
        assert!(f.headings.is_empty());
        assert_eq!(f.link_count, 0);
        assert_eq!(f.image_count, 0);
        assert_eq!(f.meta_description, "");
        assert_eq!(f.content, "Nothing much here.");

        let q = crate::scoring::data_quality(&f);
        assert_eq!(q.completeness, 4);
        assert_eq!(q.overall, 0.5);
    }

    #[test]
    fn empty_document() {
        let doc = Html::parse_document("");
        let f = extract("https://example.com/empty", &doc);
        assert_eq!(f.title, "");
        assert_eq!(f.content, "");
        assert!(f.headings.is_empty());
    }

    #[test]
    fn long_body_truncated_to_limit() {
        let body = "é".repeat(6000);
        let doc = Html::parse_document(&format!("<html><body><p>  {}  </p></body></html>", body));
        let f = extract("https://example.com/long", &doc);
        assert_eq!(f.content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn headings_keep_document_order() {
        let doc = Html::parse_document(
            "<body><h3>c</h3><h1> a </h1><h4>skip</h4><h2>b</h2></body>",
        );
        let f = extract("https://example.com/", &doc);
        assert_eq!(f.headings, vec!["c", "a", "b"]);
    }

    #[test]
    fn extraction_is_repeatable() {
        let doc = fixture("article");
        let mut a = extract("https://example.com/post", &doc);
        let mut b = extract("https://example.com/post", &doc);
        a.timestamp.clear();
        b.timestamp.clear();
        assert_eq!(a, b);
    }

    #[test]
    fn record_with_and_without_analytics() {
        let doc = fixture("article");
        let fields = extract("https://example.com/post", &doc);

        let with = build_record(fields.clone(), true, Instant::now());
        let a = with.analytics.as_ref().unwrap();
        assert_eq!(a.heading_structure, 3);
        assert!(a.has_meta_description);
        assert_eq!(with.metadata.scraper_version, SCRAPER_VERSION);
        // all eight fields are filled on the article fixture
        assert_eq!(with.data_quality.completeness, 8);
        assert_eq!(with.data_quality.overall, 1.0);

        let without = build_record(fields, false, Instant::now());
        assert!(without.analytics.is_none());
        assert_eq!(without.data_quality, with.data_quality);
    }
}
