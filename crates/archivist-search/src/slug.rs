use chrono::NaiveDateTime;

const MAX_QUERY_SLUG: usize = 48;

/// Lower-case ASCII alphanumerics joined by single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// File stem for a query's persisted results. The hash suffix keeps queries
/// that slugify identically ("Storm" and "storm") apart.
pub fn search_slug(timestamp: NaiveDateTime, query: &str) -> String {
    let mut text = slugify(query);
    if text.len() > MAX_QUERY_SLUG {
        text.truncate(MAX_QUERY_SLUG);
        while text.ends_with('-') {
            text.pop();
        }
    }
    if text.is_empty() {
        text.push_str("query");
    }
    let hash = blake3::hash(query.as_bytes()).to_hex();
    format!("{}_{}_{}", timestamp.format("%Y-%m-%d_%H-%M-%S"), text, &hash[..8])
}
