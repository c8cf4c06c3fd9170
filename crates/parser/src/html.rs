use scraper::{Html, Node, Selector};
use url::Url;

/// One element attribute, kept with its location for match records.
pub struct AttrValue {
    pub tag: String,
    pub attr: String,
    pub value: String,
}

/// The fixed scan surfaces of one document, extracted in a single pass over
/// the DOM. Order of fields mirrors the order they are scanned in.
pub struct ScanSurfaces {
    /// Visible text, whitespace-collapsed; script and style bodies excluded.
    pub text: String,
    pub title: Option<String>,
    pub metas: Vec<String>,
    pub attrs: Vec<AttrValue>,
    pub scripts: Vec<String>,
    pub comments: Vec<String>,
    /// Every href/src candidate resolved against the base URL.
    pub link_urls: Vec<String>,
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

pub fn extract(html: &str, base: Option<&Url>) -> ScanSurfaces {
    let document = Html::parse_document(html);

    let mut text_parts: Vec<String> = Vec::new();
    let mut comments: Vec<String> = Vec::new();
    for node in document.tree.nodes() {
        match node.value() {
            Node::Text(text) => {
                // script/style are their own surfaces or noise; title is
                // scanned separately.
                let excluded = node
                    .parent()
                    .and_then(|p| p.value().as_element().map(|el| el.name().to_string()))
                    .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "title"));
                if !excluded && !text.trim().is_empty() {
                    text_parts.push(text.to_string());
                }
            }
            Node::Comment(comment) => {
                let trimmed = comment.trim();
                if !trimmed.is_empty() {
                    comments.push(trimmed.to_string());
                }
            }
            _ => {}
        }
    }
    let text = text_parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let title = selector("title")
        .and_then(|s| document.select(&s).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let metas = selector("meta[content]")
        .map(|s| {
            document
                .select(&s)
                .filter_map(|el| el.value().attr("content"))
                .map(|v| v.to_string())
                .filter(|v| !v.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let attrs = selector("*")
        .map(|s| {
            document
                .select(&s)
                .flat_map(|el| {
                    let tag = el.value().name().to_string();
                    el.value()
                        .attrs()
                        .filter(|(_, value)| !value.trim().is_empty())
                        .map(|(attr, value)| AttrValue {
                            tag: tag.clone(),
                            attr: attr.to_string(),
                            value: value.to_string(),
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        })
        .unwrap_or_default();

    let scripts = selector("script")
        .map(|s| {
            document
                .select(&s)
                .map(|el| el.text().collect::<String>())
                .filter(|body| !body.trim().is_empty())
                .collect()
        })
        .unwrap_or_default();

    let link_urls = match base {
        Some(base) => extract_link_urls(&document, base),
        None => Vec::new(),
    };

    ScanSurfaces {
        text,
        title,
        metas,
        attrs,
        scripts,
        comments,
        link_urls,
    }
}

/// href/src values of the link-bearing elements, resolved to absolute URLs.
fn extract_link_urls(document: &Html, base: &Url) -> Vec<String> {
    let Some(sel) = selector("a, img, script, iframe, link") else {
        return Vec::new();
    };
    let mut urls = Vec::new();
    for el in document.select(&sel) {
        for key in ["href", "src"] {
            let Some(raw) = el.value().attr(key) else {
                continue;
            };
            let raw = raw.trim();
            if raw.is_empty()
                || raw.starts_with('#')
                || raw.starts_with("javascript:")
                || raw.starts_with("mailto:")
                || raw.starts_with("tel:")
                || raw.starts_with("data:")
            {
                continue;
            }
            if let Ok(resolved) = base.join(raw) {
                urls.push(resolved.to_string());
            }
        }
    }
    urls
}
