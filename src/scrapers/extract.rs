//! HTML heuristics: listing links, article body, publication date.
//!
//! All functions here are synchronous and take the raw HTML string, so a
//! parsed `scraper::Html` (which is not `Send`) never lives across an
//! `.await` in the fetcher.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static PARAGRAPH: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p").expect("static selector `p` is valid"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex is valid"));

/// Meta tags checked for a publication timestamp, in order.
static PUBLISHED_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        r#"meta[property="article:published_time"]"#,
        r#"meta[itemprop="datePublished"]"#,
        r#"meta[name="publish-date"]"#,
        r#"meta[name="Last-Modified"]"#,
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("static meta selector is valid"))
    .collect()
});

/// Compiled selectors for one source's listing pages.
#[derive(Debug, Clone)]
pub struct ListingSelectors {
    /// One match per listed article.
    pub item: Selector,
    /// Link inside the item; `None` when the item is the `<a>` itself.
    pub link: Option<Selector>,
    /// Title inside the item; `None` takes the link text.
    pub title: Option<Selector>,
}

/// An article discovered on a listing page, not yet fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStub {
    pub title: String,
    pub url: String,
}

/// Extracted parts of an article page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticlePage {
    pub content: String,
    pub published: Option<String>,
}

/// Text of an element with runs of whitespace collapsed.
fn clean_text(el: ElementRef<'_>) -> String {
    let raw: String = el.text().collect();
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

/// Collect article links from a listing page. Items without a usable link
/// or title are skipped; relative links are resolved against `base`.
///
/// # Arguments
///
/// * `html` - The listing page body
/// * `base` - URL the page was fetched from
/// * `selectors` - The item selector, plus optional link and title
///   selectors within each item (the item itself otherwise)
///
/// # Examples
///
/// ```ignore
/// let stubs = parse_listing(r#"<li class="clearfix"><a href="/a.html">A</a></li>"#, &base, &sel);
/// assert_eq!(stubs[0].url, "https://www.moneycontrol.com/a.html");
/// ```
pub fn parse_listing(html: &str, base: &Url, selectors: &ListingSelectors) -> Vec<LinkStub> {
    let document = Html::parse_document(html);
    let mut stubs = Vec::new();
    for item in document.select(&selectors.item) {
        let link = match &selectors.link {
            Some(sel) => item.select(sel).next(),
            None => Some(item),
        };
        let Some(link) = link else { continue };
        let Some(href) = link.value().attr("href").map(str::trim).filter(|h| !h.is_empty()) else {
            continue;
        };
        let Ok(url) = base.join(href) else { continue };

        let title = match &selectors.title {
            Some(sel) => item.select(sel).next().map(clean_text),
            None => Some(clean_text(link)),
        };
        let Some(title) = title.filter(|t| !t.is_empty()) else { continue };

        stubs.push(LinkStub {
            title,
            url: url.to_string(),
        });
    }
    stubs
}

/// Body text from the first candidate container that exists on the page:
/// its `<p>` texts, blank ones dropped, joined by a blank line. Later
/// candidates are not consulted once one matches, even if it holds no
/// paragraphs.
pub fn extract_content(document: &Html, containers: &[Selector]) -> String {
    let Some(container) = containers.iter().find_map(|sel| document.select(sel).next()) else {
        return String::new();
    };
    container
        .select(&PARAGRAPH)
        .map(clean_text)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Publication date from well-known meta tags, as `YYYY-MM-DD` when it
/// parses, otherwise the raw attribute value.
pub fn extract_published(document: &Html) -> Option<String> {
    PUBLISHED_META
        .iter()
        .filter_map(|sel| document.select(sel).next())
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(normalize_date)
}

fn normalize_date(raw: &str) -> String {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.date_naive().format("%Y-%m-%d").to_string();
    }
    if let Some(prefix) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    raw.to_string()
}

pub fn parse_article(html: &str, containers: &[Selector]) -> ArticlePage {
    let document = Html::parse_document(html);
    ArticlePage {
        content: extract_content(&document, containers),
        published: extract_published(&document),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(s: &str) -> Selector {
        Selector::parse(s).unwrap()
    }

    #[test]
    fn test_first_matching_container_wins() {
        let html = r#"
            <div class="contentSec"><p>second choice</p></div>
            <div class="story-content"><p> First   para </p><p></p><p>Second para</p></div>
        "#;
        let containers = [sel("div.story-content"), sel("div.contentSec"), sel("div#mainContent")];
        let page = parse_article(html, &containers);
        assert_eq!(page.content, "First para\n\nSecond para");
    }

    #[test]
    fn test_falls_through_to_later_container() {
        let html = r#"<div id="mainContent"><p>Only here</p></div>"#;
        let containers = [sel("div.story-content"), sel("div.contentSec"), sel("div#mainContent")];
        assert_eq!(parse_article(html, &containers).content, "Only here");
    }

    #[test]
    fn test_matching_container_without_paragraphs_is_empty() {
        let html = r#"<div class="article_page">no paragraphs</div><div id="contentdata"><p>x</p></div>"#;
        let containers = [sel("div.article_page"), sel("div#contentdata")];
        assert_eq!(parse_article(html, &containers).content, "");
    }

    #[test]
    fn test_no_container_yields_empty_content() {
        assert_eq!(parse_article("<p>stray</p>", &[sel("div.article-section")]).content, "");
    }

    #[test]
    fn test_listing_with_title_and_link_selectors() {
        let html = r#"
            <ul>
              <li class="clearfix"><a href="https://www.moneycontrol.com/news/a.html"><img/></a><h2>Sensex  climbs</h2></li>
              <li class="clearfix"><h2>No link</h2></li>
              <li class="clearfix"><a href="/news/b.html">x</a><h2>Relative</h2></li>
            </ul>"#;
        let selectors = ListingSelectors {
            item: sel("li.clearfix"),
            link: Some(sel("a")),
            title: Some(sel("h2")),
        };
        let base = Url::parse("https://www.moneycontrol.com").unwrap();
        let stubs = parse_listing(html, &base, &selectors);
        assert_eq!(
            stubs,
            vec![
                LinkStub {
                    title: "Sensex climbs".into(),
                    url: "https://www.moneycontrol.com/news/a.html".into()
                },
                LinkStub {
                    title: "Relative".into(),
                    url: "https://www.moneycontrol.com/news/b.html".into()
                },
            ]
        );
    }

    #[test]
    fn test_listing_title_from_link_text() {
        let html = r#"<div class="headlineSec"><a href="/market/story-1.html"> Rupee gains </a></div>"#;
        let selectors = ListingSelectors {
            item: sel("div.headlineSec"),
            link: Some(sel("a")),
            title: None,
        };
        let base = Url::parse("https://www.livemint.com").unwrap();
        let stubs = parse_listing(html, &base, &selectors);
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].title, "Rupee gains");
        assert_eq!(stubs[0].url, "https://www.livemint.com/market/story-1.html");
    }

    #[test]
    fn test_published_date_from_meta() {
        let html = r#"<head><meta property="article:published_time" content="2024-01-15T09:30:00+05:30"></head>"#;
        assert_eq!(parse_article(html, &[]).published.as_deref(), Some("2024-01-15"));

        let html = r#"<head><meta itemprop="datePublished" content="2024-02-01 10:00:00"></head>"#;
        assert_eq!(parse_article(html, &[]).published.as_deref(), Some("2024-02-01"));

        let html = r#"<head><meta name="publish-date" content="Jan 15, 2024"></head>"#;
        assert_eq!(parse_article(html, &[]).published.as_deref(), Some("Jan 15, 2024"));

        assert_eq!(parse_article("<html></html>", &[]).published, None);
    }
}
