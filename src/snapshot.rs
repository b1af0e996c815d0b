//! Page Snapshot Module
//! A rendered page captured from a browser, replayed with scraper

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::critical::{CapturedRule, ElementLayout, RenderedPage, UnsupportedSelector};

/// Serialized state of a rendered page.
///
/// `layout[i]` belongs to the i-th element in document order, the order
/// `document.querySelectorAll('*')` returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub url: String,
    pub html: String,
    #[serde(default)]
    pub rules: Vec<CapturedRule>,
    #[serde(default)]
    pub layout: Vec<ElementLayout>,
}

/// Parsed snapshot that answers selector and layout queries
pub struct SnapshotPage {
    document: Html,
    rules: Vec<CapturedRule>,
    layout: Vec<ElementLayout>,
}

impl SnapshotPage {
    pub fn new(snapshot: PageSnapshot) -> Self {
        let document = Html::parse_document(&snapshot.html);
        let page = Self {
            document,
            rules: snapshot.rules,
            layout: snapshot.layout,
        };

        let element_count = page.elements().len();
        if element_count != page.layout.len() {
            tracing::debug!(
                "Snapshot {}: {} elements but {} layout boxes",
                snapshot.url,
                element_count,
                page.layout.len()
            );
        }
        page
    }
}

fn inside_template(element: &ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().name() == "template")
}

impl RenderedPage for SnapshotPage {
    type Element<'a> = (usize, ElementRef<'a>) where Self: 'a;
    type Selector = Selector;

    fn captured_rules(&self) -> Vec<CapturedRule> {
        self.rules.clone()
    }

    /// Template contents are inert and never listed by `querySelectorAll`
    fn elements(&self) -> Vec<(usize, ElementRef<'_>)> {
        self.document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|element| !inside_template(element))
            .enumerate()
            .collect()
    }

    fn layout(&self, element: &(usize, ElementRef<'_>)) -> Option<ElementLayout> {
        self.layout.get(element.0).cloned()
    }

    fn compile_selector(&self, selector: &str) -> Result<Selector, UnsupportedSelector> {
        Selector::parse(selector).map_err(|e| UnsupportedSelector {
            selector: selector.to_string(),
            reason: format!("{:?}", e),
        })
    }

    fn matches(&self, element: &(usize, ElementRef<'_>), selector: &Selector) -> bool {
        selector.matches(&element.1)
    }
}
