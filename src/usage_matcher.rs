//! Usage Matcher Module
//! Decides whether a selector group is live for a set of observed tokens

use regex::Regex;

use crate::error::PurgeError;
use crate::selector_parser::Rule;
use crate::token_extractor::TokenSets;

/// Safelist used when no override is configured
pub const DEFAULT_SAFELIST: &[&str] = &[
    r"^is-.*",
    r"^has-.*",
    r"^active$",
    r"^nav-.*",
    r"^menu-.*",
    r"^ui-.*",
    r"^semantic-.*",
];

/// Compiled safelist patterns, matched against bare class/ID names
#[derive(Debug, Clone)]
pub struct Safelist {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
}

impl Safelist {
    /// Compile patterns with anchored full-match semantics
    pub fn new<I, S>(patterns: I) -> Result<Self, PurgeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let compiled = patterns
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
                    PurgeError::InvalidSafelist {
                        pattern: pattern.clone(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns, compiled })
    }

    pub fn defaults() -> Result<Self, PurgeError> {
        Self::new(DEFAULT_SAFELIST.iter().copied())
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            compiled: Vec::new(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.compiled.iter().any(|re| re.is_match(name))
    }
}

/// Class and ID names named by one selector group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorComponents {
    pub classes: Vec<String>,
    pub ids: Vec<String>,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}

/// Read a CSS escape starting at the backslash at `chars[i]`.
/// Returns the decoded character and the index after the escape.
fn read_escape(chars: &[char], i: usize) -> (Option<char>, usize) {
    let mut j = i + 1;
    let hex_start = j;
    while j < chars.len() && j - hex_start < 6 && chars[j].is_ascii_hexdigit() {
        j += 1;
    }

    if j > hex_start {
        let hex: String = chars[hex_start..j].iter().collect();
        let decoded = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32);
        // one whitespace terminates a hex escape
        if j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        return (decoded, j);
    }

    (chars.get(hex_start).copied(), hex_start + 1)
}

/// Read an identifier at `chars[i]`, resolving escapes
fn read_ident(chars: &[char], mut i: usize) -> (String, usize) {
    let mut ident = String::new();
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            let (decoded, next) = read_escape(chars, i);
            if let Some(decoded) = decoded {
                ident.push(decoded);
            }
            i = next;
        } else if is_ident_char(c) {
            ident.push(c);
            i += 1;
        } else {
            break;
        }
    }
    (ident, i)
}

/// Index just past the quoted string opening at `chars[i]`
fn skip_quoted(chars: &[char], i: usize) -> usize {
    let quote = chars[i];
    let mut j = i + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            c if c == quote => return j + 1,
            _ => j += 1,
        }
    }
    chars.len()
}

/// Index just past the bracket group `open ... close` starting at `chars[i]`
fn skip_group(chars: &[char], i: usize, open: char, close: char) -> usize {
    let mut depth = 0usize;
    let mut j = i;
    while j < chars.len() {
        let c = chars[j];
        if c == '"' || c == '\'' {
            j = skip_quoted(chars, j);
            continue;
        }
        if c == '\\' {
            j += 2;
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return j + 1;
            }
        }
        j += 1;
    }
    chars.len()
}

/// Extract `.class` and `#id` components of one selector group.
///
/// Attribute predicates (`[...]`) and pseudo suffixes (`:hover`, `::before`,
/// `:not(...)`) are skipped so names inside them are never counted.
/// Combinators are ignored: `.nav .item` yields both classes.
pub fn decompose(group: &str) -> SelectorComponents {
    let chars: Vec<char> = group.chars().collect();
    let mut components = SelectorComponents::default();
    let mut i = 0usize;

    while i < chars.len() {
        match chars[i] {
            '\\' => i = read_escape(&chars, i).1,
            '"' | '\'' => i = skip_quoted(&chars, i),
            '[' => i = skip_group(&chars, i, '[', ']'),
            ':' => {
                i += 1;
                if chars.get(i) == Some(&':') {
                    i += 1;
                }
                i = read_ident(&chars, i).1;
                if chars.get(i) == Some(&'(') {
                    i = skip_group(&chars, i, '(', ')');
                }
            }
            marker @ ('.' | '#') => {
                let (name, next) = read_ident(&chars, i + 1);
                if !name.is_empty() {
                    if marker == '.' {
                        components.classes.push(name);
                    } else {
                        components.ids.push(name);
                    }
                }
                i = next.max(i + 1);
            }
            _ => i += 1,
        }
    }

    components
}

/// Liveness check for selectors against observed tokens and a safelist
#[derive(Debug, Clone)]
pub struct UsageMatcher {
    safelist: Safelist,
}

impl UsageMatcher {
    pub fn new(safelist: Safelist) -> Self {
        Self { safelist }
    }

    pub fn safelist(&self) -> &Safelist {
        &self.safelist
    }

    /// A group is live when every class/ID component is used or safelisted.
    /// Groups without class/ID components are always live.
    pub fn is_live(&self, group: &str, used: &TokenSets) -> bool {
        let components = decompose(group);

        let classes_ok = components
            .classes
            .iter()
            .all(|name| used.classes.contains(name) || self.safelist.is_match(name));
        let ids_ok = components
            .ids
            .iter()
            .all(|name| used.ids.contains(name) || self.safelist.is_match(name));

        classes_ok && ids_ok
    }

    /// A rule survives if it is an at-rule or any of its groups is live
    pub fn is_rule_live(&self, rule: &Rule, used: &TokenSets) -> bool {
        if rule.is_at_rule() {
            return true;
        }

        let groups = rule.selector_groups();
        if groups.is_empty() {
            return true;
        }
        groups.iter().any(|group| self.is_live(group, used))
    }
}
