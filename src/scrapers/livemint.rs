//! [LiveMint](https://www.livemint.com/latest-news) latest-news feed.
//!
//! A single listing walked from page 2 (`/latest-news/page-2`). LiveMint
//! blocks aggressive clients, so every request waits 1.5 to 3.5 seconds and
//! uses a rotated desktop User-Agent. Articles without body text are
//! dropped.

use super::http::Politeness;
use super::SourceProfile;
use crate::models::Source;

pub const BASE_URL: &str = "https://www.livemint.com/latest-news";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
];

fn page_url(_category: &str, page: u32) -> String {
    if page > 1 {
        format!("{BASE_URL}/page-{page}")
    } else {
        BASE_URL.to_string()
    }
}

pub fn profile() -> SourceProfile {
    SourceProfile {
        source: Source::LiveMint,
        base_url: "https://www.livemint.com",
        categories: &["latest-news"],
        first_page: 2,
        page_url,
        item_selector: "div.headlineSec",
        link_selector: Some("a"),
        title_selector: None,
        content_selectors: &["div.story-content", "div.contentSec", "div#mainContent"],
        require_content: true,
        politeness: Politeness {
            user_agents: USER_AGENTS,
            headers: &[],
            throttle: Some((1_500, 3_500)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_urls() {
        assert_eq!(page_url("latest-news", 2), "https://www.livemint.com/latest-news/page-2");
        assert_eq!(page_url("latest-news", 1), "https://www.livemint.com/latest-news");
    }

    #[test]
    fn test_pages_start_at_two() {
        let p = profile();
        assert_eq!(p.pages(4).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(p.pages(1).count(), 0);
        assert_eq!(p.politeness.throttle, Some((1_500, 3_500)));
    }
}
