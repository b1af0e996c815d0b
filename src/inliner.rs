//! Critical CSS Inliner Module
//! Injects critical CSS into <head> and defers the full stylesheets

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::PurgeError;

/// Result of rewriting one HTML document
#[derive(Debug, Clone, Serialize)]
pub struct InlineOutcome {
    pub html: String,
    pub stylesheets_deferred: usize,
}

/// A `<link rel="stylesheet">` tag found in a document
#[derive(Debug, Clone, PartialEq)]
struct StylesheetLink {
    span: Range<usize>,
    href: String,
}

fn link_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<link\b[^>]*>").expect("valid link pattern"))
}

fn tag_pattern(name: &'static str) -> Regex {
    Regex::new(&format!(r"(?is)<{}\b[^>]*>", name)).expect("valid tag pattern")
}

/// Extract an attribute value from a tag string
fn extract_attribute(tag: &str, attr_name: &str) -> Option<String> {
    let pattern = Regex::new(&format!(
        r#"(?i)\s{}\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#,
        regex::escape(attr_name)
    ))
    .ok()?;
    let caps = pattern.captures(tag)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().to_string())
}

fn has_attribute(tag: &str, attr_name: &str) -> bool {
    Regex::new(&format!(r"(?i)\s{}(\s*=|[\s/>])", regex::escape(attr_name)))
        .map(|re| re.is_match(tag))
        .unwrap_or(false)
}

/// Find stylesheet link tags, in document order
fn find_stylesheet_links(html: &str) -> Vec<StylesheetLink> {
    link_tag_pattern()
        .find_iter(html)
        .filter_map(|m| {
            let tag = m.as_str();
            let rel = extract_attribute(tag, "rel")?;
            if !rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")) {
                return None;
            }
            Some(StylesheetLink {
                span: m.range(),
                href: extract_attribute(tag, "href").unwrap_or_default(),
            })
        })
        .collect()
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// Where the critical `<style>` goes: after the viewport meta, else after
/// the charset meta, else right after `<head>`
fn critical_insert_position(html: &str) -> Option<usize> {
    let head = tag_pattern("head").find(html)?;
    let head_end = html[head.end()..]
        .to_ascii_lowercase()
        .find("</head>")
        .map(|pos| head.end() + pos)
        .unwrap_or(html.len());
    let head_content = &html[head.end()..head_end];

    let metas: Vec<_> = tag_pattern("meta").find_iter(head_content).collect();
    let viewport = metas.iter().find(|m| {
        extract_attribute(m.as_str(), "name")
            .map(|name| name.eq_ignore_ascii_case("viewport"))
            .unwrap_or(false)
    });
    let charset = metas.iter().find(|m| has_attribute(m.as_str(), "charset"));

    Some(match viewport.or(charset) {
        Some(meta) => head.end() + meta.end(),
        None => head.end(),
    })
}

fn deferred_link_markup(href: &str) -> String {
    let href = escape_attribute(href);
    format!(
        "<link rel=\"stylesheet\" href=\"{0}\" media=\"print\" onload=\"this.media='all'\"><noscript><link rel=\"stylesheet\" href=\"{0}\"></noscript>",
        href
    )
}

/// Inline `critical_css` into the document and defer its stylesheets.
///
/// Documents without stylesheet links are returned unchanged. Without a
/// `<body>` the critical CSS is still injected but links stay in place.
pub fn inline_critical_css(html: &str, critical_css: &str) -> InlineOutcome {
    let links = find_stylesheet_links(html);
    if links.is_empty() {
        tracing::warn!("Inliner: No stylesheet links found in HTML");
        return InlineOutcome {
            html: html.to_string(),
            stylesheets_deferred: 0,
        };
    }

    let style_tag = format!("<style id=\"critical-css\">\n{}\n</style>", critical_css);
    let has_body = tag_pattern("body").is_match(html);
    let mut result = html.to_string();

    // Remove links back to front so earlier spans stay valid
    if has_body {
        for link in links.iter().rev() {
            result.replace_range(link.span.clone(), "");
        }

        let deferred: String = links.iter().map(|l| deferred_link_markup(&l.href)).collect();
        let body_close = result.to_ascii_lowercase().rfind("</body>").unwrap_or(result.len());
        result.insert_str(body_close, &deferred);
    } else {
        tracing::warn!("Inliner: No <body> tag found, stylesheet deferral skipped");
    }

    match critical_insert_position(&result) {
        Some(pos) => result.insert_str(pos, &style_tag),
        None => {
            tracing::warn!("Inliner: No <head> tag found, creating one");
            let head = format!("<head>{}</head>", style_tag);
            let pos = tag_pattern("html").find(&result).map(|m| m.end()).unwrap_or(0);
            result.insert_str(pos, &head);
        }
    }

    let stylesheets_deferred = if has_body { links.len() } else { 0 };
    tracing::debug!(
        "Inliner: Injected {} bytes of critical CSS, deferred {} stylesheets ({} -> {} bytes)",
        critical_css.len(),
        stylesheets_deferred,
        html.len(),
        result.len()
    );

    InlineOutcome {
        html: result,
        stylesheets_deferred,
    }
}

/// Inline critical CSS into every `*.html` under `html_dir`, mirroring paths
/// into `output_dir`. Returns the number of documents written.
pub fn inline_directory(html_dir: &Path, critical_css: &str, output_dir: &Path) -> Result<usize, PurgeError> {
    if !html_dir.is_dir() {
        return Err(PurgeError::MissingInput {
            path: html_dir.to_path_buf(),
        });
    }

    let mut processed = 0usize;
    for entry in WalkDir::new(html_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Inliner: Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        let is_html = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("html"))
            .unwrap_or(false);
        if !entry.file_type().is_file() || !is_html {
            continue;
        }

        let Ok(relative) = path.strip_prefix(html_dir) else {
            continue;
        };
        let target = output_dir.join(relative);

        let written = fs::read_to_string(path)
            .map(|html| inline_critical_css(&html, critical_css).html)
            .and_then(|html| {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, html)
            });

        match written {
            Ok(()) => processed += 1,
            Err(e) => tracing::warn!("Inliner: Error processing {}: {}", path.display(), e),
        }
    }

    tracing::info!("Inliner: Processed {} files into {}", processed, output_dir.display());
    Ok(processed)
}

fn resolve_stylesheet(html_path: &Path, href: &str) -> PathBuf {
    let base = html_path.parent().unwrap_or_else(|| Path::new(""));
    let local = href.split(['?', '#']).next().unwrap_or(href);
    base.join(local.trim_start_matches('/'))
}

/// Replace local stylesheet links with `<style data-inlined-from>` blocks so
/// the page renders from disk without fetching stylesheets.
pub fn inline_linked_stylesheets(html_path: &Path) -> Result<String, PurgeError> {
    let html = fs::read_to_string(html_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PurgeError::MissingInput {
                path: html_path.to_path_buf(),
            }
        } else {
            PurgeError::io(html_path, e)
        }
    })?;

    let mut result = html.clone();
    let mut inlined = 0usize;

    for link in find_stylesheet_links(&html).into_iter().rev() {
        if link.href.is_empty() {
            continue;
        }
        if link.href.starts_with("http://") || link.href.starts_with("https://") {
            tracing::info!("Inliner: Skipping remote stylesheet: {}", link.href);
            continue;
        }

        let css_path = resolve_stylesheet(html_path, &link.href);
        match fs::read_to_string(&css_path) {
            Ok(css) => {
                let style = format!(
                    "<style data-inlined-from=\"{}\">\n{}\n</style>",
                    escape_attribute(&link.href),
                    css
                );
                result.replace_range(link.span, &style);
                inlined += 1;
            }
            Err(e) => {
                tracing::warn!("Inliner: Stylesheet not found: {} ({})", css_path.display(), e);
            }
        }
    }

    tracing::debug!("Inliner: Inlined {} stylesheet(s) into {}", inlined, html_path.display());
    Ok(result)
}
