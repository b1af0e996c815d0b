//! Site Analyzer Module
//! Reports used vs unused selectors across a built site

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Serialize;
use walkdir::WalkDir;

use crate::error::PurgeError;
use crate::selector_parser::{parse_rules, RuleKind};
use crate::token_extractor::{collect_site_tokens, Extractor, TokenSets};
use crate::usage_matcher::UsageMatcher;

/// Unused selectors listed in a report
pub const SAMPLE_UNUSED_LIMIT: usize = 20;

/// Usage statistics for one analysis run
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub html_files: usize,
    pub script_files: usize,
    pub css_files: usize,
    /// Entries that could not be walked or read
    pub skipped_files: usize,
    pub total_css_size: usize,
    pub total_css_kb: f64,
    pub classes_found: usize,
    pub ids_found: usize,
    pub total_selectors: usize,
    pub used_selectors: usize,
    pub unused_selectors: usize,
    pub unused_percentage: f64,
    pub safelist_patterns: Vec<String>,
    pub sample_unused: Vec<String>,
}

/// Distinct selector groups split by liveness
#[derive(Debug, Default)]
pub struct SelectorUsage {
    pub used: BTreeSet<String>,
    pub unused: BTreeSet<String>,
}

impl SelectorUsage {
    /// Classify every style-rule selector group in `css`, including rules
    /// nested in conditional group at-rules such as `@media`
    pub fn record(&mut self, css: &str, used: &TokenSets, matcher: &UsageMatcher) {
        for rule in parse_rules(css) {
            if rule.kind == RuleKind::AtRule {
                if is_conditional_group(&rule.selector) {
                    self.record(&rule.body, used, matcher);
                }
                continue;
            }

            for group in rule.selector_groups() {
                if self.used.contains(group) || self.unused.contains(group) {
                    continue;
                }
                if matcher.is_live(group, used) {
                    self.used.insert(group.to_string());
                } else {
                    self.unused.insert(group.to_string());
                }
            }
        }
    }

    pub fn total(&self) -> usize {
        self.used.len() + self.unused.len()
    }

    pub fn unused_percentage(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.unused.len() as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// At-rules whose block holds ordinary style rules
const CONDITIONAL_GROUP_RULES: &[&str] = &["@media", "@supports", "@container", "@layer", "@document", "@scope"];

fn is_conditional_group(prelude: &str) -> bool {
    let name = prelude
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    CONDITIONAL_GROUP_RULES.contains(&name.as_str())
}

fn is_css_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("css"))
        .unwrap_or(false)
}

/// Analyze the HTML, JS and CSS below `site_dir`
pub fn analyze_site(site_dir: &Path, extractor: Extractor, matcher: &UsageMatcher) -> Result<UsageReport, PurgeError> {
    let scan = collect_site_tokens(site_dir, extractor)?;

    tracing::info!(
        "Analyzer: {} unique classes and {} unique IDs in {}",
        scan.tokens.classes.len(),
        scan.tokens.ids.len(),
        site_dir.display()
    );

    let mut usage = SelectorUsage::default();
    let mut css_files = 0usize;
    let mut total_css_size = 0usize;

    let mut skipped_files = scan.skipped_files;

    for entry in WalkDir::new(site_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Analyzer: Skipping unreadable entry: {}", e);
                skipped_files += 1;
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || !is_css_file(path) {
            continue;
        }

        match fs::read_to_string(path) {
            Ok(content) => {
                usage.record(&content, &scan.tokens, matcher);
                total_css_size += content.len();
                css_files += 1;
            }
            Err(e) => {
                tracing::warn!("Analyzer: Could not read {}: {}", path.display(), e);
                skipped_files += 1;
            }
        }
    }

    let report = UsageReport {
        html_files: scan.html_files,
        script_files: scan.script_files,
        css_files,
        skipped_files,
        total_css_size,
        total_css_kb: total_css_size as f64 / 1024.0,
        classes_found: scan.tokens.classes.len(),
        ids_found: scan.tokens.ids.len(),
        total_selectors: usage.total(),
        used_selectors: usage.used.len(),
        unused_selectors: usage.unused.len(),
        unused_percentage: usage.unused_percentage(),
        safelist_patterns: matcher.safelist().patterns().to_vec(),
        sample_unused: usage.unused.iter().take(SAMPLE_UNUSED_LIMIT).cloned().collect(),
    };

    tracing::info!(
        "Analyzer: {} CSS files ({:.1} KB), {}/{} selectors unused ({:.1}%)",
        report.css_files,
        report.total_css_kb,
        report.unused_selectors,
        report.total_selectors,
        report.unused_percentage
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage_matcher::Safelist;

    #[test]
    fn test_selector_usage_counts_distinct_groups() {
        let matcher = UsageMatcher::new(Safelist::empty());
        let used = TokenSets {
            classes: ["a".to_string()].into_iter().collect(),
            ids: Default::default(),
        };

        let mut usage = SelectorUsage::default();
        usage.record(".a, .b { x: y }\n.b { z: w }\np { m: 0 }", &used, &matcher);

        assert_eq!(usage.used.iter().collect::<Vec<_>>(), vec![".a", "p"]);
        assert_eq!(usage.unused.iter().collect::<Vec<_>>(), vec![".b"]);
        assert_eq!(usage.total(), 3);
        assert!((usage.unused_percentage() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_selector_usage_counts_conditional_group_rules() {
        let matcher = UsageMatcher::new(Safelist::empty());
        let used = TokenSets {
            classes: ["a".to_string()].into_iter().collect(),
            ids: Default::default(),
        };

        let css = "@media (max-width: 600px) { .a { x: y } .c { d: e } }\n\
                   @supports (display: grid) { @media print { .d { f: g } } }\n\
                   @keyframes spin { from { a: b } to { a: c } }\n\
                   @font-face { font-family: X; }";
        let mut usage = SelectorUsage::default();
        usage.record(css, &used, &matcher);

        assert_eq!(usage.used.iter().collect::<Vec<_>>(), vec![".a"]);
        assert_eq!(usage.unused.iter().collect::<Vec<_>>(), vec![".c", ".d"]);
        // keyframe selectors are not style rules
        assert!(!usage.used.contains("from"));
    }

    #[test]
    fn test_analyze_site_counts_unreadable_css() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.css"), ".a { b: c }").unwrap();
        fs::write(dir.path().join("bad.css"), [0xff, 0xfe, 0x00]).unwrap();

        let matcher = UsageMatcher::new(Safelist::empty());
        let report = analyze_site(dir.path(), Extractor::Strict, &matcher).unwrap();
        assert_eq!(report.css_files, 1);
        assert_eq!(report.skipped_files, 1);
        assert_eq!(report.total_selectors, 1);
    }

    #[test]
    fn test_analyze_site_report() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("css")).unwrap();
        fs::write(root.join("index.html"), r#"<body class="home"><div id="hero" class="card"></div></body>"#).unwrap();
        fs::write(
            root.join("css/site.css"),
            ".home { a: b }\n#hero .card { c: d }\n.is-open { e: f }\n.zeta { g: h }\n.alpha { i: j }",
        )
        .unwrap();

        let matcher = UsageMatcher::new(Safelist::defaults().unwrap());
        let report = analyze_site(root, Extractor::Strict, &matcher).unwrap();

        assert_eq!(report.html_files, 1);
        assert_eq!(report.css_files, 1);
        assert_eq!(report.classes_found, 2);
        assert_eq!(report.ids_found, 1);
        assert_eq!(report.total_selectors, 5);
        assert_eq!(report.used_selectors, 3);
        assert_eq!(report.unused_selectors, 2);
        assert_eq!(report.sample_unused, vec![".alpha".to_string(), ".zeta".to_string()]);
        assert_eq!(report.safelist_patterns.len(), 7);
        assert!((report.unused_percentage - 40.0).abs() < 1e-9);

        let json = serde_json::to_value(&report).unwrap();
        for field in [
            "total_css_size",
            "classes_found",
            "ids_found",
            "total_selectors",
            "used_selectors",
            "unused_selectors",
            "unused_percentage",
            "safelist_patterns",
            "sample_unused",
        ] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
    }

    #[test]
    fn test_sample_unused_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let css: String = (0..30).map(|i| format!(".u{:02} {{ a: b }}\n", i)).collect();
        fs::write(dir.path().join("all.css"), css).unwrap();

        let matcher = UsageMatcher::new(Safelist::empty());
        let report = analyze_site(dir.path(), Extractor::Strict, &matcher).unwrap();
        assert_eq!(report.unused_selectors, 30);
        assert_eq!(report.sample_unused.len(), SAMPLE_UNUSED_LIMIT);
        assert_eq!(report.sample_unused[0], ".u00");
    }
}
