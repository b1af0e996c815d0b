//! Selector Parser Module
//! Splits stylesheet text into rules without building a CSS AST

use std::sync::OnceLock;

use regex::Regex;

/// How a parsed rule participates in pruning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// `selector { declarations }`
    Style,
    /// `@media ... { ... }`, `@keyframes`, `@font-face`, ...
    AtRule,
    /// `@import ...;`, `@charset ...;` and other block-less at-rules
    Statement,
}

/// One rule: prelude text plus its raw, untouched block body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub selector: String,
    pub body: String,
    pub kind: RuleKind,
    /// Deepest `{` nesting inside the body (0 for a flat declaration list)
    pub depth: usize,
}

impl Rule {
    pub fn is_at_rule(&self) -> bool {
        matches!(self.kind, RuleKind::AtRule | RuleKind::Statement)
    }

    /// Comma-separated selector groups of a style rule
    pub fn selector_groups(&self) -> Vec<&str> {
        match self.kind {
            RuleKind::Style => split_selector_groups(&self.selector),
            RuleKind::AtRule | RuleKind::Statement => Vec::new(),
        }
    }

    /// Re-emit the rule with its original selector and body
    pub fn to_css(&self) -> String {
        match self.kind {
            RuleKind::Statement => self.selector.clone(),
            RuleKind::Style | RuleKind::AtRule => {
                format!("{} {{\n  {}\n}}", self.selector, self.body)
            }
        }
    }
}

fn comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment pattern"))
}

fn license_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)/\*!.*?\*/").expect("valid license pattern"))
}

/// Remove every `/* ... */` block comment
pub fn strip_comments(css: &str) -> String {
    comment_pattern().replace_all(css, "").into_owned()
}

/// `/*! ... */` license and attribution comments, in source order
pub fn license_comments(css: &str) -> Vec<&str> {
    license_pattern().find_iter(css).map(|m| m.as_str()).collect()
}

/// Index just past the string literal opening at `start`.
/// An unterminated string ends at the next newline, as in CSS.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Find the `}` closing the block opened at `open`.
///
/// Returns the index of the closing brace (or `bytes.len()` when the block
/// never closes), the deepest nesting seen inside the body, and whether the
/// block was closed.
fn find_block_end(bytes: &[u8], open: usize) -> (usize, usize, bool) {
    let mut depth = 1usize;
    let mut max_depth = 0usize;
    let mut i = open + 1;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'\\' => i += 1,
            b'{' => {
                depth += 1;
                max_depth = max_depth.max(depth - 1);
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return (i, max_depth, true);
                }
            }
            _ => {}
        }
        i += 1;
    }

    (bytes.len(), max_depth, false)
}

/// Parse stylesheet text into rules, in source order.
///
/// Comments are stripped first. Blocks may nest to any depth and braces
/// inside quoted strings are ignored. Parsing never fails: stray closing
/// braces are skipped and an unterminated final block runs to end of input.
pub fn parse_rules(css: &str) -> Vec<Rule> {
    let text = strip_comments(css);
    let bytes = text.as_bytes();
    let mut rules = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'\\' => i += 1,
            b'{' => {
                let selector = text[start..i].trim().to_string();
                let (end, depth, closed) = find_block_end(bytes, i);
                let body = text[(i + 1).min(end)..end].trim().to_string();

                if !closed {
                    tracing::warn!("Selector parser: Unterminated block after `{}`", selector);
                }
                if depth > 1 {
                    tracing::debug!(
                        "Selector parser: `{}` nests {} levels deep",
                        selector,
                        depth
                    );
                }

                let kind = if selector.starts_with('@') {
                    RuleKind::AtRule
                } else {
                    RuleKind::Style
                };
                rules.push(Rule {
                    selector,
                    body,
                    kind,
                    depth,
                });

                i = end + 1;
                start = i;
                continue;
            }
            b'}' => {
                tracing::debug!("Selector parser: Skipping stray `}}` at byte {}", i);
                start = i + 1;
            }
            b';' => {
                let prelude = text[start..=i].trim();
                if prelude.starts_with('@') {
                    rules.push(Rule {
                        selector: prelude.to_string(),
                        body: String::new(),
                        kind: RuleKind::Statement,
                        depth: 0,
                    });
                    start = i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    let trailing = text.get(start..).map(str::trim).unwrap_or("");
    if !trailing.is_empty() {
        tracing::debug!("Selector parser: Ignoring trailing text `{}`", trailing);
    }

    rules
}

/// Split selector text on top-level commas.
///
/// Commas inside `(...)`, `[...]` and quoted strings do not split.
pub fn split_selector_groups(selector: &str) -> Vec<&str> {
    let bytes = selector.as_bytes();
    let mut groups = Vec::new();
    let mut parens = 0usize;
    let mut brackets = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'\\' => i += 1,
            b'(' => parens += 1,
            b')' => parens = parens.saturating_sub(1),
            b'[' => brackets += 1,
            b']' => brackets = brackets.saturating_sub(1),
            b',' if parens == 0 && brackets == 0 => {
                groups.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    groups.push(&selector[start.min(selector.len())..]);

    groups
        .into_iter()
        .map(str::trim)
        .filter(|group| !group.is_empty())
        .collect()
}
