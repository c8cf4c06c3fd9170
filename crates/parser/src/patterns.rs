use regex::{Regex, RegexBuilder};

use wayscan_core::CrawlError;

/// Always appended after the file-loaded set.
const BUILTIN_PATTERNS: &[&str] = &[r"j+e+f+f+\s*t+h+e+\s*k+i+l+l+e+r"];

pub fn load_patterns(path: &str, case_sensitive: bool) -> Result<Vec<Regex>, CrawlError> {
    let raw = std::fs::read_to_string(path)?;
    compile(raw.lines(), case_sensitive)
}

/// One pattern per line; blank lines and `#` comments skipped. ASCII lines
/// become word-bounded phrases with whitespace runs collapsed to `\s+`;
/// anything containing a non-ASCII codepoint is matched as an escaped
/// literal (word boundaries are meaningless for CJK keywords).
pub fn compile<'a>(
    lines: impl Iterator<Item = &'a str>,
    case_sensitive: bool,
) -> Result<Vec<Regex>, CrawlError> {
    let mut patterns = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let source = if line.is_ascii() {
            let tokens: Vec<String> = line.split_whitespace().map(|t| regex::escape(t)).collect();
            format!(r"\b{}\b", tokens.join(r"\s+"))
        } else {
            regex::escape(line)
        };
        patterns.push(build(&source, case_sensitive)?);
    }
    for source in BUILTIN_PATTERNS {
        patterns.push(build(source, case_sensitive)?);
    }
    Ok(patterns)
}

fn build(source: &str, case_sensitive: bool) -> Result<Regex, CrawlError> {
    RegexBuilder::new(source)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| CrawlError::Parse(format!("bad pattern '{source}': {e}")))
}
