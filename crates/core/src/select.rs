// ABOUTME: Narrows a page to the elements addressed by a CSS selector before normalization.
// ABOUTME: Selector misses and invalid selectors degrade to whole-page monitoring.

//! Selector-based extraction.
//!
//! Selectors are compiled once and cached process-wide, including invalid
//! ones (cached as `None`) so a broken selector in the site list is only
//! parsed once per process.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use crate::normalize::normalize;

static SELECTOR_CACHE: Lazy<RwLock<HashMap<String, Option<Selector>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Gets or compiles a CSS selector, caching the result.
///
/// Returns `None` for selectors that fail to parse.
pub fn get_or_compile(css: &str) -> Option<Selector> {
    {
        let cache = SELECTOR_CACHE.read().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.get(css) {
            return cached.clone();
        }
    }

    let compiled = Selector::parse(css).ok();
    let mut cache = SELECTOR_CACHE.write().unwrap_or_else(|e| e.into_inner());
    cache
        .entry(css.to_string())
        .or_insert(compiled)
        .clone()
}

/// How a selector applied to a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorOutcome {
    /// The selector matched this many elements.
    Matched(usize),
    /// The selector matched nothing; the whole page was used.
    NoMatch,
    /// The selector did not parse; the whole page was used.
    Invalid,
}

impl SelectorOutcome {
    /// True when extraction fell back to the whole document.
    pub fn is_fallback(&self) -> bool {
        !matches!(self, SelectorOutcome::Matched(_))
    }
}

impl fmt::Display for SelectorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorOutcome::Matched(n) => write!(f, "matched {} element(s)", n),
            SelectorOutcome::NoMatch => write!(f, "no match, using whole page"),
            SelectorOutcome::Invalid => write!(f, "invalid selector, using whole page"),
        }
    }
}

/// Markup selected for normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub html: String,
    pub outcome: SelectorOutcome,
}

/// Applies `selector` to `raw_html`.
///
/// Matched elements are serialized (outer HTML) and concatenated in document
/// order. Zero matches or an unparsable selector return the entire input.
pub fn extract(raw_html: &str, selector: &str) -> Extraction {
    let Some(compiled) = get_or_compile(selector) else {
        return Extraction {
            html: raw_html.to_string(),
            outcome: SelectorOutcome::Invalid,
        };
    };

    let document = Html::parse_document(raw_html);
    let mut html = String::new();
    let mut count = 0;
    for element in document.select(&compiled) {
        html.push_str(&element.html());
        count += 1;
    }

    if count == 0 {
        return Extraction {
            html: raw_html.to_string(),
            outcome: SelectorOutcome::NoMatch,
        };
    }

    Extraction {
        html,
        outcome: SelectorOutcome::Matched(count),
    }
}

/// Normalized content for a page, optionally narrowed by a selector.
///
/// Returns the canonical text plus the selector outcome when one was given.
pub fn extract_content(raw_html: &str, selector: Option<&str>) -> (String, Option<SelectorOutcome>) {
    match selector.map(str::trim).filter(|s| !s.is_empty()) {
        Some(sel) => {
            let extraction = extract(raw_html, sel);
            (normalize(&extraction.html), Some(extraction.outcome))
        }
        None => (normalize(raw_html), None),
    }
}
