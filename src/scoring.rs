use crate::record::{Analytics, DataQuality, PageFields};

const WORDS_PER_MINUTE: usize = 200;

/// Share of non-empty top-level fields. Takes `PageFields` so that the
/// derived objects attached later never count towards completeness.
pub fn data_quality(fields: &PageFields) -> DataQuality {
    let filled = fields.filled().iter().filter(|f| **f).count();
    DataQuality {
        overall: filled as f64 / PageFields::FIELD_COUNT as f64,
        completeness: filled,
        has_content: fields.content_len() > 100,
    }
}

pub fn engagement(fields: &PageFields) -> f64 {
    let raw = fields.headings.len() as f64 * 0.1
        + fields.image_count as f64 * 0.05
        + fields.content_len() as f64 / 10_000.0;
    raw.min(1.0)
}

/// Weighted sum of four presence checks, capped at 1.0.
pub fn business_value(fields: &PageFields) -> f64 {
    // weights in tenths to keep sums exact
    let mut tenths = 0u32;
    if !fields.title.is_empty() {
        tenths += 2;
    }
    if !fields.meta_description.is_empty() {
        tenths += 2;
    }
    if fields.content_len() > 500 {
        tenths += 3;
    }
    if fields.headings.len() > 2 {
        tenths += 3;
    }
    f64::from(tenths) / 10.0
}

pub fn reading_time(content: &str) -> usize {
    content.split_whitespace().count().div_ceil(WORDS_PER_MINUTE)
}

pub fn analytics(fields: &PageFields) -> Analytics {
    Analytics {
        content_length: fields.content_len(),
        reading_time: reading_time(&fields.content),
        has_meta_description: !fields.meta_description.is_empty(),
        heading_structure: fields.headings.len(),
        engagement_potential: engagement(fields),
        business_value: business_value(fields),
    }
}
