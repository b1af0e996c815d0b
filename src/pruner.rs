//! Pruner Module
//! Removes rules whose selectors are never used by the site

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use crate::error::PurgeError;
use crate::selector_parser::{license_comments, parse_rules};
use crate::token_extractor::TokenSets;
use crate::usage_matcher::UsageMatcher;

/// Before/after numbers for one pruning run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PruneStats {
    pub original_size: usize,
    pub pruned_size: usize,
    /// Negative when re-emitting a minified stylesheet makes it larger
    pub reduction_bytes: i64,
    pub reduction_percentage: f64,
    pub rules_kept: usize,
    pub rules_removed: usize,
}

impl PruneStats {
    fn new(original_size: usize, pruned_size: usize, rules_kept: usize, rules_removed: usize) -> Self {
        let reduction_bytes = original_size as i64 - pruned_size as i64;
        let reduction_percentage = if original_size > 0 {
            reduction_bytes as f64 / original_size as f64 * 100.0
        } else {
            0.0
        };

        Self {
            original_size,
            pruned_size,
            reduction_bytes,
            reduction_percentage,
            rules_kept,
            rules_removed,
        }
    }
}

/// Pruned stylesheet plus its statistics
#[derive(Debug, Clone)]
pub struct PruneOutput {
    pub css: String,
    pub stats: PruneStats,
}

/// Rule-level stylesheet pruner
pub struct Pruner<'a> {
    matcher: &'a UsageMatcher,
}

impl<'a> Pruner<'a> {
    pub fn new(matcher: &'a UsageMatcher) -> Self {
        Self { matcher }
    }

    /// Keep every rule that has a live selector group, plus all at-rules.
    ///
    /// Kept rules are re-emitted in source order and `/*! ... */` comments
    /// are prepended regardless of what survives.
    pub fn prune(&self, css: &str, used: &TokenSets) -> PruneOutput {
        let mut kept = Vec::new();
        let mut removed = 0usize;

        for rule in parse_rules(css) {
            if self.matcher.is_rule_live(&rule, used) {
                kept.push(rule.to_css());
            } else {
                tracing::trace!("Pruner: Dropping `{}`", rule.selector);
                removed += 1;
            }
        }

        let mut pruned = kept.join("\n\n");

        let licenses = license_comments(css);
        if !licenses.is_empty() {
            pruned = format!("{}\n\n{}", licenses.join("\n"), pruned);
        }

        let stats = PruneStats::new(css.len(), pruned.len(), kept.len(), removed);

        tracing::debug!(
            "Pruner: {} rules removed, {} kept, {:.1}% reduction",
            stats.rules_removed,
            stats.rules_kept,
            stats.reduction_percentage
        );

        PruneOutput { css: pruned, stats }
    }

    /// Prune `input` into `output`.
    ///
    /// The output is written to a sibling temp file and renamed into place,
    /// so a failed run never leaves a partial stylesheet behind.
    pub fn prune_file(&self, input: &Path, output: &Path, used: &TokenSets) -> Result<PruneStats, PurgeError> {
        let css = fs::read_to_string(input).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                PurgeError::MissingInput {
                    path: input.to_path_buf(),
                }
            } else {
                PurgeError::io(input, e)
            }
        })?;

        let result = self.prune(&css, used);
        write_atomically(output, &result.css)?;

        tracing::info!(
            "Pruner: {} -> {} ({} -> {} bytes)",
            input.display(),
            output.display(),
            result.stats.original_size,
            result.stats.pruned_size
        );

        Ok(result.stats)
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pruned.css".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
}

fn write_atomically(path: &Path, contents: &str) -> Result<(), PurgeError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PurgeError::io(parent, e))?;
    }

    let tmp = temp_sibling(path);
    fs::write(&tmp, contents).map_err(|e| PurgeError::io(&tmp, e))?;

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(PurgeError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage_matcher::Safelist;

    fn tokens(classes: &[&str], ids: &[&str]) -> TokenSets {
        TokenSets {
            classes: classes.iter().map(|s| s.to_string()).collect(),
            ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    const SITE_CSS: &str = r#"/*! theme v2 | MIT */
/* layout */
body { margin: 0; }
.used, .unused-xyz { color: blue; }
.totally-unused-class-7f3 { display: none; }
#app .is-active { font-weight: bold; }
@media (max-width: 600px) { .never { display: none; } }
@font-face { font-family: "X"; src: url(x.woff2); }
"#;

    #[test]
    fn test_prune_keeps_live_rules_in_order() {
        let matcher = UsageMatcher::new(Safelist::defaults().unwrap());
        let result = Pruner::new(&matcher).prune(SITE_CSS, &tokens(&["used"], &["app"]));

        let expected = r#"/*! theme v2 | MIT */

body {
  margin: 0;
}

.used, .unused-xyz {
  color: blue;
}

#app .is-active {
  font-weight: bold;
}

@media (max-width: 600px) {
  .never { display: none; }
}

@font-face {
  font-family: "X"; src: url(x.woff2);
}"#;
        assert_eq!(result.css, expected);
        assert_eq!(result.stats.rules_kept, 5);
        assert_eq!(result.stats.rules_removed, 1);
        assert!(!result.css.contains("totally-unused-class-7f3"));
        assert!(!result.css.contains("/* layout */"));
    }

    #[test]
    fn test_prune_is_idempotent() {
        let matcher = UsageMatcher::new(Safelist::defaults().unwrap());
        let pruner = Pruner::new(&matcher);
        let used = tokens(&["used"], &[]);

        let once = pruner.prune(SITE_CSS, &used);
        let twice = pruner.prune(&once.css, &used);
        assert_eq!(once.css, twice.css);
        assert_eq!(twice.stats.rules_removed, 0);
        assert_eq!(twice.stats.reduction_bytes, 0);
    }

    #[test]
    fn test_at_rules_survive_empty_token_sets() {
        let matcher = UsageMatcher::new(Safelist::empty());
        let css = "@import url(base.css);\n@keyframes spin { from { a: b } to { a: c } }\n.x { y: z }";
        let result = Pruner::new(&matcher).prune(css, &TokenSets::new());

        assert!(result.css.contains("@import url(base.css);"));
        assert!(result.css.contains("@keyframes spin"));
        assert!(!result.css.contains(".x"));
        assert_eq!(result.stats.rules_removed, 1);
    }

    #[test]
    fn test_safelisted_class_kept_without_markup() {
        let safelist = Safelist::new([r"^is-.*"]).unwrap();
        let matcher = UsageMatcher::new(safelist);
        let result = Pruner::new(&matcher).prune(".is-active { color: red; }", &TokenSets::new());
        assert_eq!(result.css, ".is-active {\n  color: red;\n}");
        assert_eq!(result.stats.rules_kept, 1);
    }

    #[test]
    fn test_utility_classes_from_markup_survive() {
        use crate::token_extractor::Extractor;

        let used = Extractor::Strict.extract(r#"<div class="card md:flex"></div><p class="w-1/2 lead"></p>"#);
        let css = ".card { a: b }\n.lead { c: d }\n.md\\:flex { display: flex }\n.w-1\\/2 { width: 50% }\n.gone { e: f }";
        let result = Pruner::new(&UsageMatcher::new(Safelist::empty())).prune(css, &used);

        assert_eq!(result.stats.rules_kept, 4);
        assert_eq!(result.stats.rules_removed, 1);
        assert!(result.css.contains(".md\\:flex {"));
        assert!(!result.css.contains(".gone"));
    }

    #[test]
    fn test_pure_element_rule_kept() {
        let matcher = UsageMatcher::new(Safelist::empty());
        let result = Pruner::new(&matcher).prune("div { margin: 0; }", &TokenSets::new());
        assert_eq!(result.stats.rules_kept, 1);
        assert_eq!(result.stats.rules_removed, 0);
    }

    #[test]
    fn test_stats_arithmetic() {
        let matcher = UsageMatcher::new(Safelist::empty());
        let css = ".a { color: red; }\n.b { color: blue; }\n.c { color: green; }";
        let stats = Pruner::new(&matcher).prune(css, &tokens(&["a"], &[])).stats;

        assert_eq!(stats.original_size, css.len());
        assert_eq!(stats.reduction_bytes, stats.original_size as i64 - stats.pruned_size as i64);
        let expected = stats.reduction_bytes as f64 / stats.original_size as f64 * 100.0;
        assert!((stats.reduction_percentage - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_minified_input_can_grow() {
        let matcher = UsageMatcher::new(Safelist::empty());
        let stats = Pruner::new(&matcher).prune(".a{b:c}", &tokens(&["a"], &[])).stats;
        assert!(stats.reduction_bytes < 0);
        assert!(stats.reduction_percentage < 0.0);
    }

    #[test]
    fn test_empty_stylesheet() {
        let matcher = UsageMatcher::new(Safelist::empty());
        let result = Pruner::new(&matcher).prune("", &TokenSets::new());
        assert_eq!(result.css, "");
        assert_eq!(result.stats.reduction_percentage, 0.0);
    }

    #[test]
    fn test_prune_file_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("main.css");
        let output = dir.path().join("dist/main.min.css");
        fs::write(&input, ".keep { a: b }\n.drop { c: d }").unwrap();

        let matcher = UsageMatcher::new(Safelist::empty());
        let stats = Pruner::new(&matcher)
            .prune_file(&input, &output, &tokens(&["keep"], &[]))
            .unwrap();

        assert_eq!(stats.rules_kept, 1);
        assert_eq!(fs::read_to_string(&output).unwrap(), ".keep {\n  a: b\n}");
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("dist")).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_prune_file_missing_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.css");

        let matcher = UsageMatcher::new(Safelist::empty());
        let err = Pruner::new(&matcher)
            .prune_file(&dir.path().join("absent.css"), &output, &TokenSets::new())
            .unwrap_err();

        assert!(matches!(err, PurgeError::MissingInput { .. }));
        assert!(!output.exists());
    }
}
