pub mod html;
pub mod patterns;

use std::collections::HashSet;

use chrono::Utc;
use regex::Regex;
use tracing::debug;
use url::Url;

use wayscan_core::config::ParserConfig;
use wayscan_core::{urls, CrawlError, Match, MatchKind};

/// Surfaces shorter than this are noise (single characters, stray
/// punctuation nodes).
const MIN_SURFACE_LEN: usize = 3;
const MAX_CONTEXT: usize = 500;

/// Compiled keyword scanner plus the discovery filter. Pure CPU; one
/// instance is shared read-only by every worker.
pub struct Parser {
    patterns: Vec<Regex>,
    url_filters: Vec<Regex>,
    archive_host: String,
    targets: Vec<String>,
}

impl Parser {
    pub fn new(
        cfg: &ParserConfig,
        archive_host: impl Into<String>,
        targets: Vec<String>,
    ) -> Result<Self, CrawlError> {
        let patterns = patterns::load_patterns(&cfg.patterns_file, cfg.case_sensitive)?;
        let url_filters = cfg
            .url_filters
            .iter()
            .map(|f| {
                Regex::new(f).map_err(|e| CrawlError::Config(format!("bad url filter '{f}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            url_filters,
            archive_host: archive_host.into(),
            targets,
        })
    }

    /// Scan one document. Returns unique matches and unique discovered
    /// URLs, both in first-seen order.
    pub fn parse(&self, html: &str, base_url: &str) -> (Vec<Match>, Vec<String>) {
        let base = Url::parse(base_url).ok();
        let surfaces = html::extract(html, base.as_ref());

        let mut collector = Collector::default();
        collector.scan_windowed(&self.patterns, &surfaces.text, MatchKind::Text);
        if let Some(title) = &surfaces.title {
            collector.scan_value(&self.patterns, title, MatchKind::Text, None);
        }
        for meta in &surfaces.metas {
            collector.scan_value(&self.patterns, meta, MatchKind::Meta, None);
        }
        for attr in &surfaces.attrs {
            let kind = match (attr.tag.as_str(), attr.attr.as_str()) {
                ("img", "src") => MatchKind::ImgSrc,
                ("img", "alt") => MatchKind::ImgAlt,
                ("img", "title") => MatchKind::ImgTitle,
                _ => MatchKind::Attr,
            };
            let location = format!("<{} {}=\"{}\">", attr.tag, attr.attr, attr.value);
            collector.scan_value(&self.patterns, &attr.value, kind, Some(&location));
        }
        for script in &surfaces.scripts {
            collector.scan_windowed(&self.patterns, script, MatchKind::Script);
        }
        for comment in &surfaces.comments {
            collector.scan_windowed(&self.patterns, comment, MatchKind::Comment);
        }
        for link in &surfaces.link_urls {
            collector.scan_value(&self.patterns, link, MatchKind::Link, None);
        }

        let mut seen = HashSet::new();
        let mut discovered = Vec::new();
        for raw in &surfaces.link_urls {
            if let Some(normalized) = self.keep_discovery(raw) {
                if seen.insert(normalized.clone()) {
                    discovered.push(normalized);
                }
            }
        }
        debug!(
            base = base_url,
            matches = collector.out.len(),
            discovered = discovered.len(),
            "page scanned"
        );
        (collector.out, discovered)
    }

    /// A link survives as a discovery only when it is a replay URL on the
    /// archive host whose embedded original belongs to the target-domain
    /// set and no exclude filter hits.
    fn keep_discovery(&self, raw: &str) -> Option<String> {
        let url = Url::parse(raw).ok()?;
        if !urls::is_snapshot_url(&url, &self.archive_host) {
            return None;
        }
        let original = urls::snapshot_original(&url)?;
        if !urls::matches_target(&original, &self.targets) {
            return None;
        }
        if self.url_filters.iter().any(|f| f.is_match(raw)) {
            return None;
        }
        urls::normalize(raw)
    }
}

#[derive(Default)]
struct Collector {
    seen: HashSet<(MatchKind, String, String)>,
    out: Vec<Match>,
}

impl Collector {
    /// Scan a long surface; context is a window around the hit.
    fn scan_windowed(&mut self, patterns: &[Regex], surface: &str, kind: MatchKind) {
        if surface.trim().len() < MIN_SURFACE_LEN {
            return;
        }
        for pattern in patterns {
            for found in pattern.find_iter(surface) {
                let context = context_window(surface, found.start(), found.end());
                self.record(found.as_str(), kind, context);
            }
        }
    }

    /// Scan a short value; context is the value itself (or the supplied
    /// location fragment), clipped.
    fn scan_value(
        &mut self,
        patterns: &[Regex],
        value: &str,
        kind: MatchKind,
        location: Option<&str>,
    ) {
        if value.trim().len() < MIN_SURFACE_LEN {
            return;
        }
        for pattern in patterns {
            for found in pattern.find_iter(value) {
                let context = clip(location.unwrap_or(value));
                self.record(found.as_str(), kind, context);
            }
        }
    }

    fn record(&mut self, value: &str, kind: MatchKind, context: String) {
        if !self.seen.insert((kind, value.to_string(), context.clone())) {
            return;
        }
        self.out.push(Match {
            value: value.to_string(),
            kind,
            context,
            timestamp: Utc::now(),
        });
    }
}

fn clip(value: &str) -> String {
    if value.len() <= MAX_CONTEXT {
        return value.to_string();
    }
    let mut end = MAX_CONTEXT;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}

/// Up to `MAX_CONTEXT` bytes centered on the hit, with ellipses marking the
/// truncated sides.
fn context_window(text: &str, start: usize, end: usize) -> String {
    let span = end - start;
    let pad = MAX_CONTEXT.saturating_sub(span) / 2;
    let mut lo = start.saturating_sub(pad);
    let mut hi = (end + pad).min(text.len());
    while !text.is_char_boundary(lo) {
        lo -= 1;
    }
    while !text.is_char_boundary(hi) {
        hi += 1;
    }
    let mut out = String::new();
    if lo > 0 {
        out.push_str("...");
    }
    out.push_str(&text[lo..hi]);
    if hi < text.len() {
        out.push_str("...");
    }
    out
}
