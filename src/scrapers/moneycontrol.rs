//! [MoneyControl](https://www.moneycontrol.com/news/) category listings.
//!
//! Pages start at 1; the first page has no `page-N` suffix:
//!
//! ```text
//! https://www.moneycontrol.com/news/business/
//! https://www.moneycontrol.com/news/business/page-2/
//! ```
//!
//! Articles whose body cannot be extracted are kept with empty content.

use super::http::Politeness;
use super::SourceProfile;
use crate::models::Source;

pub const BASE_URL: &str = "https://www.moneycontrol.com/news";
pub const CATEGORIES: &[&str] = &["business", "economy", "markets", "trends"];

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn page_url(category: &str, page: u32) -> String {
    if page > 1 {
        format!("{BASE_URL}/{category}/page-{page}/")
    } else {
        format!("{BASE_URL}/{category}/")
    }
}

pub fn profile() -> SourceProfile {
    SourceProfile {
        source: Source::MoneyControl,
        base_url: "https://www.moneycontrol.com",
        categories: CATEGORIES,
        first_page: 1,
        page_url,
        item_selector: "li.clearfix",
        link_selector: Some("a"),
        title_selector: Some("h2"),
        content_selectors: &["div.article_page", "div#contentdata"],
        require_content: false,
        politeness: Politeness {
            user_agents: &[USER_AGENT],
            headers: &[
                (
                    "accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
                ),
                ("accept-language", "en-US,en;q=0.5"),
                ("upgrade-insecure-requests", "1"),
            ],
            throttle: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_urls() {
        assert_eq!(page_url("markets", 1), "https://www.moneycontrol.com/news/markets/");
        assert_eq!(page_url("markets", 3), "https://www.moneycontrol.com/news/markets/page-3/");
    }

    #[test]
    fn test_profile_keeps_empty_articles() {
        let p = profile();
        assert!(!p.require_content);
        assert_eq!(p.pages(3).collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
