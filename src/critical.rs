//! Critical CSS Module
//! Keeps captured rules that style elements visible in the initial viewport

use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size critical CSS should stay under
pub const CRITICAL_CSS_BUDGET_BYTES: usize = 10 * 1024;

/// Viewport a page was rendered at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
        }
    }

    pub fn desktop() -> Self {
        Self::new("Desktop", 1920, 1080)
    }

    pub fn mobile() -> Self {
        Self::new("Mobile", 375, 667)
    }

    /// Look up a named preset (`desktop` or `mobile`)
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "desktop" => Some(Self::desktop()),
            "mobile" => Some(Self::mobile()),
            _ => None,
        }
    }
}

/// Element bounding box relative to the viewport origin
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingRect {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl BoundingRect {
    /// Any overlap with the viewport rectangle, edges included on the far side
    pub fn intersects(&self, viewport: &Viewport) -> bool {
        self.top < f64::from(viewport.height)
            && self.bottom >= 0.0
            && self.left < f64::from(viewport.width)
            && self.right >= 0.0
    }
}

/// Rendered geometry and computed visibility of one element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementLayout {
    #[serde(flatten)]
    pub rect: BoundingRect,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub visibility: String,
}

impl ElementLayout {
    pub fn is_visible(&self) -> bool {
        self.display != "none" && self.visibility != "hidden"
    }

    pub fn in_viewport(&self, viewport: &Viewport) -> bool {
        self.is_visible() && self.rect.intersects(viewport)
    }
}

/// One stylesheet rule as captured from the rendered page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedRule {
    /// Stylesheet URL, or `inline`
    pub source: String,
    /// `None` for rules without a selector (`@font-face`, `@keyframes`, ...)
    #[serde(default)]
    pub selector: Option<String>,
    pub css_text: String,
}

/// The engine could not evaluate a selector
#[derive(Debug, Error)]
#[error("unsupported selector `{selector}`: {reason}")]
pub struct UnsupportedSelector {
    pub selector: String,
    pub reason: String,
}

/// A rendered page as exposed by a browser engine
pub trait RenderedPage {
    type Element<'a>
    where
        Self: 'a;
    type Selector;

    /// Every applicable stylesheet rule, in stylesheet order
    fn captured_rules(&self) -> Vec<CapturedRule>;

    /// All elements, in document order
    fn elements(&self) -> Vec<Self::Element<'_>>;

    /// Layout of an element, `None` if it was never rendered
    fn layout(&self, element: &Self::Element<'_>) -> Option<ElementLayout>;

    fn compile_selector(&self, selector: &str) -> Result<Self::Selector, UnsupportedSelector>;

    fn matches(&self, element: &Self::Element<'_>, selector: &Self::Selector) -> bool;
}

/// Keep rules that apply to at least one visible element inside `viewport`.
///
/// Rules without a selector and rules the engine cannot match are kept.
pub fn filter_critical_rules<P: RenderedPage>(page: &P, viewport: &Viewport) -> Vec<CapturedRule> {
    let visible: Vec<P::Element<'_>> = page
        .elements()
        .into_iter()
        .filter(|element| {
            page.layout(element)
                .map(|layout| layout.in_viewport(viewport))
                .unwrap_or(false)
        })
        .collect();

    let rules = page.captured_rules();
    let total = rules.len();

    let critical: Vec<CapturedRule> = rules
        .into_iter()
        .filter(|rule| rule_applies(page, rule, &visible))
        .collect();

    tracing::debug!(
        "Critical CSS ({} {}x{}): {} visible elements, {}/{} rules kept",
        viewport.label,
        viewport.width,
        viewport.height,
        visible.len(),
        critical.len(),
        total
    );

    critical
}

fn rule_applies<'p, P: RenderedPage>(page: &'p P, rule: &CapturedRule, visible: &[P::Element<'p>]) -> bool {
    let selector = match rule.selector.as_deref().map(str::trim) {
        Some(selector) if !selector.is_empty() => selector,
        _ => return true,
    };

    match page.compile_selector(selector) {
        Ok(compiled) => visible.iter().any(|element| page.matches(element, &compiled)),
        Err(e) => {
            tracing::debug!("Critical CSS: Keeping rule, {}", e);
            true
        }
    }
}

/// Group rules by source, in first-seen order
pub fn render_by_source(rules: &[CapturedRule]) -> String {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for rule in rules {
        match groups.iter_mut().find(|(source, _)| *source == rule.source) {
            Some((_, texts)) => texts.push(&rule.css_text),
            None => groups.push((&rule.source, vec![&rule.css_text])),
        }
    }

    let mut output = String::new();
    for (source, texts) in groups {
        output.push_str(&format!("/* Source: {} */\n", source));
        output.push_str(&texts.join("\n"));
        output.push_str("\n\n");
    }
    output
}

/// Critical rules found for one viewport
#[derive(Debug, Clone)]
pub struct ViewportSection {
    pub viewport: Viewport,
    pub rules: Vec<CapturedRule>,
}

/// A critical rule and the viewports it applied under
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalRule {
    #[serde(flatten)]
    pub rule: CapturedRule,
    pub viewports: Vec<String>,
}

/// Final critical CSS output
#[derive(Debug, Clone, Serialize)]
pub struct CriticalCss {
    pub css: String,
    pub size_bytes: usize,
    pub within_budget: bool,
    pub rules: Vec<CriticalRule>,
}

/// Tag each distinct rule with the viewports it was kept under
pub fn tag_rules(sections: &[ViewportSection]) -> Vec<CriticalRule> {
    let mut tagged: Vec<CriticalRule> = Vec::new();
    for section in sections {
        for rule in &section.rules {
            match tagged.iter_mut().find(|t| t.rule == *rule) {
                Some(existing) => {
                    if !existing.viewports.contains(&section.viewport.label) {
                        existing.viewports.push(section.viewport.label.clone());
                    }
                }
                None => tagged.push(CriticalRule {
                    rule: rule.clone(),
                    viewports: vec![section.viewport.label.clone()],
                }),
            }
        }
    }
    tagged
}

/// Concatenate per-viewport critical CSS under labeled headers.
///
/// Rules are not deduplicated across viewports.
pub fn merge_viewports(sections: &[ViewportSection]) -> String {
    let sizes = sections
        .iter()
        .map(|s| format!("{}: {}x{}", s.viewport.label, s.viewport.width, s.viewport.height))
        .collect::<Vec<_>>()
        .join(", ");

    let body = sections
        .iter()
        .map(|s| format!("/* ===== {} Viewport ===== */\n{}\n", s.viewport.label, render_by_source(&s.rules)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "/* Critical CSS - Generated for multiple viewports */\n/* {} */\n\n{}",
        sizes, body
    )
}

/// Check the size budget, warning when it is exceeded
pub fn within_budget(css: &str, budget_bytes: usize) -> bool {
    let size = css.len();
    if size > budget_bytes {
        tracing::warn!(
            "Critical CSS exceeds {:.0}KB target ({:.2} KB)",
            budget_bytes as f64 / 1024.0,
            size as f64 / 1024.0
        );
        false
    } else {
        tracing::info!("Critical CSS size: {:.2} KB ({} bytes)", size as f64 / 1024.0, size);
        true
    }
}

/// Minify CSS using lightningcss
pub fn minify_css(css: &str) -> Result<String, String> {
    let stylesheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| format!("CSS parse error: {:?}", e))?;

    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| format!("CSS print error: {:?}", e))?;

    Ok(result.code)
}

/// Build the critical CSS for one or more viewport sections.
///
/// A single section renders plain source-grouped CSS. Several sections are
/// merged under viewport headers. Minification failures fall back to the
/// unminified text.
pub fn assemble(sections: &[ViewportSection], minify: bool, budget_bytes: usize) -> CriticalCss {
    let mut css = match sections {
        [single] => render_by_source(&single.rules),
        _ => merge_viewports(sections),
    };

    if minify {
        match minify_css(&css) {
            Ok(minified) => css = minified,
            Err(e) => tracing::warn!("Critical CSS: Minification failed, keeping original: {}", e),
        }
    }

    let within = within_budget(&css, budget_bytes);

    CriticalCss {
        size_bytes: css.len(),
        within_budget: within,
        css,
        rules: tag_rules(sections),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Elements are plain class lists; selectors are single `.class` names
    struct FakePage {
        rules: Vec<CapturedRule>,
        elements: Vec<(Vec<&'static str>, Option<ElementLayout>)>,
    }

    impl RenderedPage for FakePage {
        type Element<'a> = usize where Self: 'a;
        type Selector = String;

        fn captured_rules(&self) -> Vec<CapturedRule> {
            self.rules.clone()
        }

        fn elements(&self) -> Vec<usize> {
            (0..self.elements.len()).collect()
        }

        fn layout(&self, element: &usize) -> Option<ElementLayout> {
            self.elements[*element].1.clone()
        }

        fn compile_selector(&self, selector: &str) -> Result<String, UnsupportedSelector> {
            match selector.strip_prefix('.') {
                Some(class) => Ok(class.to_string()),
                None => Err(UnsupportedSelector {
                    selector: selector.to_string(),
                    reason: "only class selectors".to_string(),
                }),
            }
        }

        fn matches(&self, element: &usize, selector: &String) -> bool {
            self.elements[*element].0.contains(&selector.as_str())
        }
    }

    fn rule(source: &str, selector: Option<&str>, css_text: &str) -> CapturedRule {
        CapturedRule {
            source: source.to_string(),
            selector: selector.map(str::to_string),
            css_text: css_text.to_string(),
        }
    }

    fn boxed(top: f64, bottom: f64) -> Option<ElementLayout> {
        Some(ElementLayout {
            rect: BoundingRect {
                top,
                bottom,
                left: 0.0,
                right: 100.0,
            },
            ..Default::default()
        })
    }

    fn sample_page() -> FakePage {
        FakePage {
            rules: vec![
                rule("https://x.test/site.css", Some(".hero"), ".hero { color: red; }"),
                rule("https://x.test/site.css", Some(".footer"), ".footer { color: blue; }"),
                rule("inline", Some(".fold"), ".fold { margin: 0; }"),
                rule("https://x.test/site.css", None, "@font-face { font-family: X; }"),
                rule("inline", Some("div > p"), "div > p { a: b; }"),
                rule("inline", Some(".hidden-thing"), ".hidden-thing { a: b; }"),
            ],
            elements: vec![
                (vec!["hero"], boxed(0.0, 400.0)),
                (vec!["fold"], boxed(1000.0, 1200.0)),
                (vec!["footer"], boxed(2000.0, 2100.0)),
                (
                    vec!["hidden-thing"],
                    Some(ElementLayout {
                        display: "none".to_string(),
                        ..boxed(0.0, 10.0).unwrap()
                    }),
                ),
                (vec!["never-rendered"], None),
            ],
        }
    }

    #[test]
    fn test_viewport_boundary() {
        let vp = Viewport::new("Test", 800, 600);
        let below = BoundingRect { top: 600.0, bottom: 700.0, left: 0.0, right: 10.0 };
        let straddling = BoundingRect { top: 599.0, bottom: 650.0, left: 0.0, right: 10.0 };
        let above = BoundingRect { top: -50.0, bottom: -1.0, left: 0.0, right: 10.0 };
        let touching_top = BoundingRect { top: -50.0, bottom: 0.0, left: 0.0, right: 10.0 };
        let right_of = BoundingRect { top: 0.0, bottom: 10.0, left: 800.0, right: 900.0 };

        assert!(!below.intersects(&vp));
        assert!(straddling.intersects(&vp));
        assert!(!above.intersects(&vp));
        assert!(touching_top.intersects(&vp));
        assert!(!right_of.intersects(&vp));
    }

    #[test]
    fn test_viewport_presets() {
        assert_eq!(Viewport::preset("Mobile"), Some(Viewport::mobile()));
        assert_eq!(Viewport::preset("desktop").map(|v| (v.width, v.height)), Some((1920, 1080)));
        assert_eq!(Viewport::preset("tablet"), None);
    }

    #[test]
    fn test_hidden_elements_are_not_visible() {
        let layout = ElementLayout {
            visibility: "hidden".to_string(),
            ..Default::default()
        };
        assert!(!layout.is_visible());
        assert!(ElementLayout::default().is_visible());
    }

    #[test]
    fn test_filter_keeps_in_viewport_and_fail_open_rules() {
        let page = sample_page();
        let kept = filter_critical_rules(&page, &Viewport::desktop());
        let texts: Vec<&str> = kept.iter().map(|r| r.css_text.as_str()).collect();

        // .fold straddles 1080; div > p is unsupported by the fake engine
        assert_eq!(
            texts,
            vec![
                ".hero { color: red; }",
                ".fold { margin: 0; }",
                "@font-face { font-family: X; }",
                "div > p { a: b; }",
            ]
        );

        let mobile = filter_critical_rules(&page, &Viewport::mobile());
        assert!(!mobile.iter().any(|r| r.css_text.starts_with(".fold")));
        assert!(mobile.iter().any(|r| r.css_text.starts_with(".hero")));
    }

    #[test]
    fn test_render_groups_by_source_in_first_seen_order() {
        let rules = vec![
            rule("a.css", Some(".x"), ".x{}"),
            rule("inline", Some(".y"), ".y{}"),
            rule("a.css", Some(".z"), ".z{}"),
        ];
        assert_eq!(
            render_by_source(&rules),
            "/* Source: a.css */\n.x{}\n.z{}\n\n/* Source: inline */\n.y{}\n\n"
        );
        assert_eq!(render_by_source(&[]), "");
    }

    #[test]
    fn test_merge_viewports_layout() {
        let sections = vec![
            ViewportSection {
                viewport: Viewport::desktop(),
                rules: vec![rule("inline", Some(".d"), ".d{}")],
            },
            ViewportSection {
                viewport: Viewport::mobile(),
                rules: vec![rule("inline", Some(".d"), ".d{}")],
            },
        ];

        let expected = "/* Critical CSS - Generated for multiple viewports */\n\
/* Desktop: 1920x1080, Mobile: 375x667 */\n\
\n\
/* ===== Desktop Viewport ===== */\n\
/* Source: inline */\n.d{}\n\n\n\
\n\
/* ===== Mobile Viewport ===== */\n\
/* Source: inline */\n.d{}\n\n\n";
        assert_eq!(merge_viewports(&sections), expected);

        let tagged = tag_rules(&sections);
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].viewports, vec!["Desktop".to_string(), "Mobile".to_string()]);
    }

    #[test]
    fn test_assemble_reports_budget_without_truncating() {
        let big = ".b { content: \"".to_string() + &"x".repeat(200) + "\"; }";
        let sections = vec![ViewportSection {
            viewport: Viewport::desktop(),
            rules: vec![rule("inline", Some(".b"), &big)],
        }];

        let result = assemble(&sections, false, 64);
        assert!(!result.within_budget);
        assert!(result.css.contains(&big));
        assert_eq!(result.size_bytes, result.css.len());

        let roomy = assemble(&sections, false, CRITICAL_CSS_BUDGET_BYTES);
        assert!(roomy.within_budget);
    }

    #[test]
    fn test_minify_css() {
        let css = r#"
            .test {
                color: #ffffff;
                margin: 0px;
            }
        "#;

        let result = minify_css(css).unwrap();
        assert!(result.len() < css.len());
        assert!(result.contains(".test"));
    }

    #[test]
    fn test_assemble_minifies_single_viewport() {
        let sections = vec![ViewportSection {
            viewport: Viewport::mobile(),
            rules: vec![rule("inline", None, ".ok { color: red; }")],
        }];
        let minified = assemble(&sections, true, CRITICAL_CSS_BUDGET_BYTES);
        assert!(minified.css.contains(".ok"));
        assert!(!minified.css.contains("/* Source"));
    }
}
