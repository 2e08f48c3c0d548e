//! [Financial Express](https://www.financialexpress.com) section archives,
//! walked from `/{section}/page/2/`. Articles without body text are
//! dropped.

use super::http::Politeness;
use super::SourceProfile;
use crate::models::Source;

pub const BASE_URL: &str = "https://www.financialexpress.com";
pub const CATEGORIES: &[&str] = &[
    "business",
    "market",
    "industry",
    "economy",
    "personal-finance",
    "opinion",
    "investing",
    "mutual-funds",
    "money",
    "auto",
    "technology",
];

fn page_url(category: &str, page: u32) -> String {
    format!("{BASE_URL}/{category}/page/{page}/")
}

pub fn profile() -> SourceProfile {
    SourceProfile {
        source: Source::FinancialExpress,
        base_url: BASE_URL,
        categories: CATEGORIES,
        first_page: 2,
        page_url,
        item_selector: "h2.entry-title",
        link_selector: Some("a"),
        title_selector: None,
        content_selectors: &["div.article-section", "div.post-content", "div.entry-content"],
        require_content: true,
        politeness: Politeness::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url() {
        assert_eq!(
            page_url("mutual-funds", 2),
            "https://www.financialexpress.com/mutual-funds/page/2/"
        );
    }

    #[test]
    fn test_all_sections_listed() {
        assert_eq!(profile().categories.len(), 11);
    }
}
