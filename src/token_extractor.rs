//! Token Extractor Module
//! Collects class and ID candidates from built HTML and script files

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::PurgeError;

/// File extensions scanned for tokens
const SCANNED_EXTENSIONS: &[&str] = &["html", "htm", "js"];

/// Class and ID names observed in site content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSets {
    pub classes: HashSet<String>,
    pub ids: HashSet<String>,
}

impl TokenSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union another set pair into this one
    pub fn merge(&mut self, other: TokenSets) {
        self.classes.extend(other.classes);
        self.ids.extend(other.ids);
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.ids.is_empty()
    }
}

/// Token extraction strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extractor {
    /// Only `class="..."` and `id="..."` attributes
    #[default]
    Strict,
    /// Every bareword counts as both a class and an ID
    Broad,
}

impl Extractor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Extractor::Strict => "strict",
            Extractor::Broad => "broad",
        }
    }

    /// Extract candidate tokens from one file's text
    pub fn extract(&self, text: &str) -> TokenSets {
        match self {
            Extractor::Strict => extract_attribute_tokens(text),
            Extractor::Broad => extract_barewords(text),
        }
    }
}

impl FromStr for Extractor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Extractor::Strict),
            "broad" => Ok(Extractor::Broad),
            other => Err(format!("unknown extractor `{}` (expected strict or broad)", other)),
        }
    }
}

fn class_attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"class=(?:"([^"]*)"|'([^']*)')"#).expect("valid class pattern"))
}

fn id_attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"id=(?:"([^"]*)"|'([^']*)')"#).expect("valid id pattern"))
}

/// Strict mode: class attribute values split on whitespace, id values taken whole
fn extract_attribute_tokens(text: &str) -> TokenSets {
    let mut tokens = TokenSets::new();

    for caps in class_attribute_pattern().captures_iter(text) {
        let value = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        for class in value.split_whitespace() {
            tokens.classes.insert(class.to_string());
        }
    }

    for caps in id_attribute_pattern().captures_iter(text) {
        let value = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str().trim());
        if !value.is_empty() {
            tokens.ids.insert(value.to_string());
        }
    }

    tokens
}

fn is_word_boundary(c: char) -> bool {
    matches!(c, '<' | '>' | '"' | '\'' | '`') || c.is_whitespace()
}

/// Broad mode: maximal runs outside markup punctuation, skipping `key:`-like runs
fn extract_barewords(text: &str) -> TokenSets {
    let words: HashSet<String> = text
        .split(is_word_boundary)
        .filter(|word| !word.is_empty() && !word.ends_with(':'))
        .map(str::to_string)
        .collect();

    TokenSets {
        classes: words.clone(),
        ids: words,
    }
}

/// Tokens gathered from a whole site directory
#[derive(Debug, Clone, Default)]
pub struct SiteScan {
    pub tokens: TokenSets,
    pub html_files: usize,
    pub script_files: usize,
    pub skipped_files: usize,
}

fn is_scanned_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SCANNED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Walk `site_dir` and union the tokens of every HTML and script file.
///
/// Unreadable files are logged and skipped. Only a missing `site_dir` is fatal.
pub fn collect_site_tokens(site_dir: &Path, extractor: Extractor) -> Result<SiteScan, PurgeError> {
    if !site_dir.is_dir() {
        return Err(PurgeError::MissingInput {
            path: site_dir.to_path_buf(),
        });
    }

    let mut scan = SiteScan::default();

    for entry in WalkDir::new(site_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Token extractor: Skipping unreadable entry: {}", e);
                scan.skipped_files += 1;
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || !is_scanned_file(path) {
            continue;
        }

        match fs::read_to_string(path) {
            Ok(content) => {
                scan.tokens.merge(extractor.extract(&content));
                if path.extension().and_then(|ext| ext.to_str()) == Some("js") {
                    scan.script_files += 1;
                } else {
                    scan.html_files += 1;
                }
            }
            Err(e) => {
                tracing::warn!("Token extractor: Could not read {}: {}", path.display(), e);
                scan.skipped_files += 1;
            }
        }
    }

    tracing::debug!(
        "Token extractor ({}): {} HTML, {} JS files ({} skipped) -> {} classes, {} IDs",
        extractor.as_str(),
        scan.html_files,
        scan.script_files,
        scan.skipped_files,
        scan.tokens.classes.len(),
        scan.tokens.ids.len()
    );

    Ok(scan)
}
