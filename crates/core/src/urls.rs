use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

/// Everything outside unreserved characters is escaped, but `:` and `/`
/// survive so the embedded original URL stays readable in the replay path.
const SNAPSHOT_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b':')
    .remove(b'/');

/// Canonical form used for dedup: lowercased, fragment stripped, query
/// stripped, trailing slash on the path removed. Idempotent.
pub fn normalize(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    url.set_fragment(None);
    url.set_query(None);
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    let mut normalized = url.to_string().to_lowercase();
    // Url serializes an empty path as "/"; the canonical form drops it.
    if url.path() == "/" && normalized.ends_with('/') {
        normalized.pop();
    }
    Some(normalized)
}

/// Whether `url` is a replay URL on the given archive host.
pub fn is_snapshot_url(url: &Url, archive_host: &str) -> bool {
    url.host_str().is_some_and(|h| h.eq_ignore_ascii_case(archive_host))
        && url.path().starts_with("/web/")
}

/// The percent-decoded original URL embedded in a replay path, i.e. the
/// part after `/web/<timestamp>[id_]/`.
pub fn snapshot_original(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    if segments.next() != Some("web") {
        return None;
    }
    let timestamp = segments.next()?;
    if !timestamp
        .trim_end_matches("id_")
        .chars()
        .all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let rest = segments.collect::<Vec<_>>().join("/");
    if rest.is_empty() {
        return None;
    }
    Some(percent_decode_str(&rest).decode_utf8_lossy().into_owned())
}

/// Host-suffix membership test for the target-domain set. Accepts both a
/// full original URL and a bare `host/path` form.
pub fn matches_target(original: &str, targets: &[String]) -> bool {
    let stripped = original
        .strip_prefix("https://")
        .or_else(|| original.strip_prefix("http://"))
        .unwrap_or(original);
    let host = stripped
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .rsplit('@')
        .next()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("")
        .to_lowercase();
    if host.is_empty() {
        return false;
    }
    targets.iter().any(|domain| {
        let domain = domain.to_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}

/// Build the replay URL for one CDX row. `id_` requests the unannotated
/// capture body.
pub fn build_snapshot_url(archive_base: &str, timestamp: &str, original: &str) -> String {
    let encoded = utf8_percent_encode(original, SNAPSHOT_PATH);
    format!(
        "{}/web/{}id_/{}",
        archive_base.trim_end_matches('/'),
        timestamp,
        encoded
    )
}
