//! Element narrowing before element selection.
//!
//! Position bounds in `0..=1` are fractions of the screen, anything larger is
//! pixels; they are compared against each element's center. When a spec leaves
//! fewer than `min_results` elements, it is relaxed in a fixed order: exclude
//! keywords first, then include keywords, then the type list.

use crate::perception::types::{ElementKind, UIElement};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionFilter {
    pub x_min: Option<f64>,
    pub x_max: Option<f64>,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SizeFilter {
    pub min_width: Option<f64>,
    pub max_width: Option<f64>,
    pub min_height: Option<f64>,
    pub max_height: Option<f64>,
    pub min_aspect_ratio: Option<f64>,
    pub max_aspect_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub position: Option<PositionFilter>,
    pub size: Option<SizeFilter>,
    pub kinds: Vec<ElementKind>,
    /// Keep elements whose description contains any of these.
    pub keywords: Vec<String>,
    /// Drop elements whose description contains any of these.
    pub exclude: Vec<String>,
    pub min_results: usize,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            position: None,
            size: None,
            kinds: Vec::new(),
            keywords: Vec::new(),
            exclude: Vec::new(),
            min_results: 5,
        }
    }
}

impl FilterSpec {
    /// Small icons along the bottom tenth of the screen.
    pub fn taskbar() -> Self {
        Self {
            position: Some(PositionFilter {
                y_min: Some(0.9),
                ..Default::default()
            }),
            size: Some(SizeFilter {
                min_width: Some(20.0),
                max_width: Some(100.0),
                min_height: Some(20.0),
                max_height: Some(100.0),
                ..Default::default()
            }),
            kinds: vec![ElementKind::Icon],
            ..Default::default()
        }
    }

    /// Wide, thin text fields in the top fifth of the screen.
    pub fn url_bar(screen_width: u32) -> Self {
        Self {
            position: Some(PositionFilter {
                y_min: Some(0.0),
                y_max: Some(0.2),
                ..Default::default()
            }),
            size: Some(SizeFilter {
                min_width: Some(f64::from(screen_width) * 0.2),
                min_aspect_ratio: Some(10.0),
                ..Default::default()
            }),
            kinds: vec![ElementKind::Text],
            ..Default::default()
        }
    }
}

pub struct ElementFilter {
    screen_width: u32,
    screen_height: u32,
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "open", "click", "then", "with", "into", "from", "that", "this", "on", "in", "to",
];

impl ElementFilter {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        Self {
            screen_width,
            screen_height,
        }
    }

    pub fn apply(&self, elements: &[UIElement], spec: &FilterSpec) -> Vec<UIElement> {
        let filtered = self.run(elements, spec);
        if filtered.len() >= spec.min_results {
            tracing::debug!(before = elements.len(), after = filtered.len(), "elements filtered");
            return filtered;
        }

        tracing::warn!(
            kept = filtered.len(),
            min = spec.min_results,
            "too few elements after filtering, relaxing"
        );
        let mut relaxed = spec.clone();
        let mut filtered = filtered;
        if !relaxed.exclude.is_empty() {
            relaxed.exclude.clear();
            filtered = self.run(elements, &relaxed);
        }
        if filtered.len() < spec.min_results && !relaxed.keywords.is_empty() {
            relaxed.keywords.clear();
            filtered = self.run(elements, &relaxed);
        }
        if filtered.len() < spec.min_results && !relaxed.kinds.is_empty() {
            relaxed.kinds.clear();
            filtered = self.run(elements, &relaxed);
        }
        tracing::debug!(before = elements.len(), after = filtered.len(), "elements filtered after relaxing");
        filtered
    }

    /// Cut a large detection down to `limit` elements likely relevant to `goal`.
    /// Matching elements come first, in detection order; the rest fill up to the limit.
    pub fn narrow_for_goal(&self, elements: &[UIElement], goal: &str, limit: usize) -> Vec<UIElement> {
        let goal_lower = goal.to_lowercase();
        let mut spec = if goal_lower.contains("taskbar") {
            FilterSpec::taskbar()
        } else if goal_lower.contains("url") || goal_lower.contains("address bar") {
            FilterSpec::url_bar(self.screen_width)
        } else {
            FilterSpec::default()
        };
        spec.keywords = goal_keywords(&goal_lower);
        spec.min_results = 1;

        let mut narrowed = self.apply(elements, &spec);
        narrowed.truncate(limit);
        for el in elements {
            if narrowed.len() >= limit {
                break;
            }
            if !narrowed.iter().any(|n| n.id == el.id) {
                narrowed.push(el.clone());
            }
        }
        narrowed
    }

    fn run(&self, elements: &[UIElement], spec: &FilterSpec) -> Vec<UIElement> {
        elements
            .iter()
            .filter(|el| spec.position.as_ref().map_or(true, |p| self.within(el, p)))
            .filter(|el| spec.size.as_ref().map_or(true, |s| fits(el, s)))
            .filter(|el| spec.kinds.is_empty() || spec.kinds.contains(&el.element_type))
            .filter(|el| spec.keywords.is_empty() || mentions_any(el, &spec.keywords))
            .filter(|el| spec.exclude.is_empty() || !mentions_any(el, &spec.exclude))
            .cloned()
            .collect()
    }

    fn within(&self, el: &UIElement, p: &PositionFilter) -> bool {
        let (cx, cy) = (f64::from(el.center.0), f64::from(el.center.1));
        let w = f64::from(self.screen_width);
        let h = f64::from(self.screen_height);
        let below = |v: Option<f64>, dim: f64, c: f64| v.map_or(false, |v| c < to_pixels(v, dim));
        let above = |v: Option<f64>, dim: f64, c: f64| v.map_or(false, |v| c > to_pixels(v, dim));
        !(below(p.x_min, w, cx) || above(p.x_max, w, cx) || below(p.y_min, h, cy) || above(p.y_max, h, cy))
    }
}

fn to_pixels(value: f64, dimension: f64) -> f64 {
    if (0.0..=1.0).contains(&value) {
        (value * dimension).trunc()
    } else {
        value.trunc()
    }
}

fn fits(el: &UIElement, s: &SizeFilter) -> bool {
    let width = f64::from(el.width());
    let height = f64::from(el.height());
    let aspect = el.aspect_ratio();
    let too_small = |min: Option<f64>, v: f64| min.is_some_and(|m| v < m);
    let too_large = |max: Option<f64>, v: f64| max.is_some_and(|m| v > m);
    !(too_small(s.min_width, width)
        || too_large(s.max_width, width)
        || too_small(s.min_height, height)
        || too_large(s.max_height, height)
        || too_small(s.min_aspect_ratio, aspect)
        || too_large(s.max_aspect_ratio, aspect))
}

fn mentions_any(el: &UIElement, words: &[String]) -> bool {
    let desc = el.description.to_lowercase();
    words.iter().any(|w| desc.contains(&w.to_lowercase()))
}

fn goal_keywords(goal: &str) -> Vec<String> {
    goal.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desktop() -> Vec<UIElement> {
        vec![
            UIElement::new(0, "Google Chrome", ElementKind::Icon, [100, 1040, 140, 1075]),
            UIElement::new(1, "File Explorer", ElementKind::Icon, [150, 1040, 190, 1075]),
            UIElement::new(2, "Recycle Bin", ElementKind::Icon, [10, 10, 60, 60]),
            UIElement::new(3, "Search Google or type a URL", ElementKind::Text, [300, 50, 1500, 80]),
            UIElement::new(4, "Chrome settings", ElementKind::Button, [1850, 50, 1880, 80]),
        ]
    }

    #[test]
    fn taskbar_preset_keeps_bottom_icons() {
        let filter = ElementFilter::new(1920, 1080);
        let spec = FilterSpec {
            min_results: 0,
            ..FilterSpec::taskbar()
        };
        let ids: Vec<u32> = filter.apply(&desktop(), &spec).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn url_bar_preset_finds_wide_text_field() {
        let filter = ElementFilter::new(1920, 1080);
        let spec = FilterSpec {
            min_results: 0,
            ..FilterSpec::url_bar(1920)
        };
        let ids: Vec<u32> = filter.apply(&desktop(), &spec).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn pixel_bounds_are_used_verbatim() {
        let filter = ElementFilter::new(1920, 1080);
        let spec = FilterSpec {
            position: Some(PositionFilter {
                x_max: Some(200.0),
                ..Default::default()
            }),
            min_results: 0,
            ..Default::default()
        };
        assert_eq!(filter.apply(&desktop(), &spec).len(), 3);
    }

    #[test]
    fn relaxes_excludes_before_keywords_before_types() {
        let filter = ElementFilter::new(1920, 1080);
        let spec = FilterSpec {
            kinds: vec![ElementKind::Icon],
            keywords: vec!["chrome".into()],
            exclude: vec!["google".into()],
            min_results: 1,
            ..Default::default()
        };
        // exclude removes the only icon matching "chrome"; dropping it restores it
        let ids: Vec<u32> = filter.apply(&desktop(), &spec).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0]);

        let spec = FilterSpec {
            kinds: vec![ElementKind::Button],
            keywords: vec!["explorer".into()],
            min_results: 1,
            ..Default::default()
        };
        // keywords go first, then the remaining button is found by type alone
        let ids: Vec<u32> = filter.apply(&desktop(), &spec).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![4]);
    }

    #[test]
    fn narrowing_puts_goal_matches_first() {
        let filter = ElementFilter::new(1920, 1080);
        let ids: Vec<u32> = filter
            .narrow_for_goal(&desktop(), "open the recycle bin", 3)
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![2, 0, 1]);
    }
}
