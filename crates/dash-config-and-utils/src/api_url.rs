//! API base-URL normalization.
//!
//! Deployments configure the API base either as a path (`/api`) or as an
//! absolute origin (`https://bi.example.com/api`). Both forms are normalized
//! so that joining endpoint paths never produces `/api/api/...` or doubled
//! slashes.

use crate::CoreResult;
use url::Url;

/// Base URL used when none is configured.
pub const DEFAULT_API_BASE_URL: &str = "/api";

fn trim_trailing_slash(value: &str) -> &str {
    value.trim_end_matches('/')
}

fn ensure_leading_slash(value: &str) -> String {
    if value.starts_with('/') {
        value.to_string()
    } else {
        format!("/{}", value)
    }
}

fn is_absolute_http(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Collapse `/api/api` into `/api` until no repeated segment remains.
///
/// Matching is case-insensitive and only applies to whole segments.
fn collapse_repeated_api_segments(value: &str) -> String {
    const NEEDLE: &str = "/api/api";
    let mut current = value.to_string();

    loop {
        let lower = current.to_ascii_lowercase();
        let mut search_from = 0;
        let mut hit = None;

        while let Some(offset) = lower[search_from..].find(NEEDLE) {
            let start = search_from + offset;
            let end = start + NEEDLE.len();
            if end == lower.len() || lower.as_bytes()[end] == b'/' {
                hit = Some(start);
                break;
            }
            search_from = start + 1;
        }

        match hit {
            Some(start) => {
                // Keep the first `/api` as written, drop the duplicate.
                current.replace_range(start + 4..start + NEEDLE.len(), "");
            }
            None => return current,
        }
    }
}

/// Collapse runs of slashes, except the `//` that follows a scheme's `:`.
fn collapse_duplicate_slashes(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '/' && out.ends_with('/') {
            let before = out[..out.len() - 1].chars().last();
            if matches!(before, Some(prev) if prev != ':') {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

/// Normalize a configured API base URL.
///
/// Empty input yields [`DEFAULT_API_BASE_URL`]. Trailing slashes are removed,
/// relative bases gain a leading slash, and repeated `/api` segments collapse.
pub fn normalize_api_base_url(raw: &str) -> String {
    let candidate = raw.trim();
    if candidate.is_empty() {
        return DEFAULT_API_BASE_URL.to_string();
    }

    let without_trailing = trim_trailing_slash(candidate);
    if is_absolute_http(without_trailing) {
        return collapse_repeated_api_segments(without_trailing);
    }

    collapse_repeated_api_segments(&ensure_leading_slash(without_trailing))
}

/// Join an endpoint path onto a (possibly unnormalized) API base.
pub fn join_api_url(base: &str, path: &str) -> String {
    let normalized_base = normalize_api_base_url(base);
    let normalized_path = ensure_leading_slash(path.trim());
    let merged = format!("{}{}", normalized_base, normalized_path);
    collapse_duplicate_slashes(&collapse_repeated_api_segments(&merged))
}

/// Join two path fragments into a single absolute path.
pub fn join_url_path(base_path: &str, endpoint: &str) -> String {
    let normalized_base = ensure_leading_slash(trim_trailing_slash(base_path));
    let normalized_endpoint = ensure_leading_slash(endpoint.trim());
    let merged = format!("{}{}", normalized_base, normalized_endpoint);

    let mut out = String::with_capacity(merged.len());
    for ch in merged.chars() {
        if ch == '/' && out.ends_with('/') {
            continue;
        }
        out.push(ch);
    }
    out
}

/// Resolve an endpoint to an absolute URL.
///
/// Relative API bases resolve against the origin of `page_url`, the same way
/// a browser resolves `fetch("/api/...")` from the current page.
pub fn resolve_api_url(page_url: &Url, base: &str, path: &str) -> CoreResult<Url> {
    let joined = join_api_url(base, path);
    if is_absolute_http(&joined) {
        return Ok(Url::parse(&joined)?);
    }
    Ok(page_url.join(&joined)?)
}
