use chrono::Utc;
use regex::Regex;
use serde::Deserialize;

/// Turns a post title into a URL slug: lowercase, alphanumerics and
/// hyphens only, runs of separators collapsed.
pub fn slugify(title: &str) -> String {
    let strip = Regex::new(r"[^A-Za-z0-9\s_-]").unwrap();
    let s = strip.replace_all(title, "").into_owned();

    let collapse = Regex::new(r"[\s_-]+").unwrap();
    collapse
        .replace_all(s.trim(), "-")
        .trim_matches('-')
        .to_lowercase()
}

/// Short suffix appended to fresh slugs so near-identical titles stay
/// distinct.
pub fn slug_suffix() -> String {
    format!("{:04}", Utc::now().timestamp_millis() % 10_000)
}

/// Truncates to at most `max` characters, appending an ellipsis when
/// anything was cut. Safe on multi-byte input.
pub fn excerpt(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Clone, Copy, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl Pagination {
    pub fn limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> usize {
        self.page.max(1).saturating_sub(1) * self.limit()
    }

    pub fn pages(&self, total: usize) -> usize {
        total.div_ceil(self.limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_lowercase_hyphenated() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Edit & Preview, together!"), "edit-preview-together");
        assert_eq!(slugify("  spaced   out  "), "spaced-out");
        assert_eq!(slugify("under_scores_too"), "under-scores-too");
    }

    #[test]
    fn slug_drops_leading_trailing_separators() {
        assert_eq!(slugify("--wow--"), "wow");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn excerpt_keeps_short_content_untouched() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("exactly10!", 10), "exactly10!");
    }

    #[test]
    fn excerpt_truncates_on_char_boundaries() {
        assert_eq!(excerpt("abcdefgh", 3), "abc...");
        assert_eq!(excerpt("héllo wörld", 4), "héll...");
    }

    #[test]
    fn pagination_defaults_and_bounds() {
        let p = Pagination::default();
        assert_eq!(p.page, 1);
        assert_eq!(p.limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(p.offset(), 0);

        let p = Pagination { page: 3, limit: 20 };
        assert_eq!(p.offset(), 40);
        assert_eq!(p.pages(41), 3);
        assert_eq!(p.pages(40), 2);
        assert_eq!(p.pages(0), 0);

        let p = Pagination { page: 0, limit: 1000 };
        assert_eq!(p.limit(), MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 0);
    }
}
