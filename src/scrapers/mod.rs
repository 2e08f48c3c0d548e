//! News source fetchers.
//!
//! Every source is described by a [`SourceProfile`] (listing URLs,
//! selectors, politeness) and walked by the same [`Fetcher`]:
//!
//! 1. **Listing**: for each category, request pages `first_page..=max_pages`
//!    and collect article links. A non-200 response, a page with no items or
//!    a network error ends that category.
//! 2. **Article**: fetch each linked page and extract body text via the
//!    profile's ordered container selectors.
//!
//! # Supported Sources
//!
//! | Source | Module | Categories | First page | Empty content |
//! |--------|--------|------------|------------|---------------|
//! | MoneyControl | [`moneycontrol`] | 4 | 1 | kept |
//! | LiveMint | [`livemint`] | latest news | 2 | dropped |
//! | Financial Express | [`financialexpress`] | 11 | 2 | dropped |
//!
//! The fetcher never fails for ordinary network or parse problems; it
//! returns what it could gather. Only a bad profile (selector or base URL)
//! is an error.

pub mod extract;
pub mod financialexpress;
pub mod http;
pub mod livemint;
pub mod moneycontrol;

use crate::errors::FetchError;
use crate::models::{Record, Source};
use chrono::Local;
use extract::{LinkStub, ListingSelectors};
use futures::stream::{self, Stream};
use http::{PageClient, Politeness};
use scraper::Selector;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Static description of how to scrape one source.
#[derive(Debug, Clone, Copy)]
pub struct SourceProfile {
    pub source: Source,
    /// Relative article links are resolved against this.
    pub base_url: &'static str,
    pub categories: &'static [&'static str],
    pub first_page: u32,
    pub page_url: fn(&str, u32) -> String,
    pub item_selector: &'static str,
    pub link_selector: Option<&'static str>,
    pub title_selector: Option<&'static str>,
    /// Candidate body containers, first match wins.
    pub content_selectors: &'static [&'static str],
    /// Drop articles whose body could not be extracted.
    pub require_content: bool,
    pub politeness: Politeness,
}

impl SourceProfile {
    /// Page numbers walked per category for a given `max_pages`.
    pub fn pages(&self, max_pages: u32) -> std::ops::RangeInclusive<u32> {
        self.first_page..=max_pages
    }
}

pub fn profile(source: Source) -> SourceProfile {
    match source {
        Source::MoneyControl => moneycontrol::profile(),
        Source::LiveMint => livemint::profile(),
        Source::FinancialExpress => financialexpress::profile(),
    }
}

fn compile(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector).map_err(|_| FetchError::InvalidSelector(selector.to_string()))
}

/// Position in the page walk. A fresh cursor restarts from the first
/// category's first page.
struct Cursor {
    category: usize,
    page: u32,
    pending: VecDeque<LinkStub>,
    found_in_category: usize,
    today: String,
}

impl Cursor {
    fn new(first_page: u32) -> Self {
        Self {
            category: 0,
            page: first_page,
            pending: VecDeque::new(),
            found_in_category: 0,
            today: Local::now().format("%Y-%m-%d").to_string(),
        }
    }

    fn next_category(&mut self, first_page: u32) {
        self.category += 1;
        self.page = first_page;
        self.found_in_category = 0;
    }
}

pub struct Fetcher {
    profile: SourceProfile,
    client: Arc<dyn PageClient>,
    max_pages: u32,
    base: Url,
    listing: ListingSelectors,
    content: Vec<Selector>,
}

impl Fetcher {
    pub fn new(
        profile: SourceProfile,
        client: Arc<dyn PageClient>,
        max_pages: u32,
    ) -> Result<Self, FetchError> {
        let base = Url::parse(profile.base_url)?;
        let listing = ListingSelectors {
            item: compile(profile.item_selector)?,
            link: profile.link_selector.map(compile).transpose()?,
            title: profile.title_selector.map(compile).transpose()?,
        };
        let content = profile
            .content_selectors
            .iter()
            .map(|s| compile(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            profile,
            client,
            max_pages,
            base,
            listing,
            content,
        })
    }

    /// Lazily walk every category and yield one record per article, in
    /// listing order. Each call starts over from the beginning.
    pub fn fetch(&self) -> impl Stream<Item = Record> + '_ {
        stream::unfold(Cursor::new(self.profile.first_page), move |cursor| {
            self.next_record(cursor)
        })
    }

    async fn next_record(&self, mut cursor: Cursor) -> Option<(Record, Cursor)> {
        loop {
            if let Some(stub) = cursor.pending.pop_front() {
                let record = self.fetch_article(stub, &cursor.today).await;
                return Some((record, cursor));
            }

            let category = *self.profile.categories.get(cursor.category)?;
            if !self.profile.pages(self.max_pages).contains(&cursor.page) {
                info!(
                    source = %self.profile.source,
                    category,
                    found = cursor.found_in_category,
                    "Reached page limit"
                );
                cursor.next_category(self.profile.first_page);
                continue;
            }

            match self.fetch_listing(category, cursor.page).await {
                Some(stubs) => {
                    cursor.found_in_category += stubs.len();
                    cursor.pending.extend(stubs);
                    cursor.page += 1;
                }
                None => {
                    info!(
                        source = %self.profile.source,
                        category,
                        found = cursor.found_in_category,
                        "Category exhausted"
                    );
                    cursor.next_category(self.profile.first_page);
                }
            }
        }
    }

    async fn get_ok(&self, url: &str) -> Result<String, FetchError> {
        let page = self.client.get(url).await?;
        if page.is_ok() {
            Ok(page.body)
        } else {
            Err(FetchError::Status(page.status))
        }
    }

    /// Links on one listing page, or `None` when the category should stop.
    #[instrument(level = "info", skip(self), fields(source = %self.profile.source))]
    async fn fetch_listing(&self, category: &str, page: u32) -> Option<Vec<LinkStub>> {
        let url = (self.profile.page_url)(category, page);
        let body = match self.get_ok(&url).await {
            Ok(body) => body,
            Err(FetchError::Status(status)) => {
                warn!(%url, status, "Listing page returned non-200; stopping category");
                return None;
            }
            Err(e) => {
                warn!(%url, error = %e, "Listing page fetch failed; stopping category");
                return None;
            }
        };
        let stubs = extract::parse_listing(&body, &self.base, &self.listing);
        if stubs.is_empty() {
            info!(%url, "No articles on listing page");
            return None;
        }
        debug!(%url, count = stubs.len(), "Indexed listing page");
        Some(stubs)
    }

    /// Fetch and extract one article. Failures yield empty content.
    async fn fetch_article(&self, stub: LinkStub, today: &str) -> Record {
        let page = match self.get_ok(&stub.url).await {
            Ok(body) => extract::parse_article(&body, &self.content),
            Err(e) => {
                warn!(url = %stub.url, error = %e, "Article fetch failed");
                extract::ArticlePage::default()
            }
        };
        if page.content.is_empty() {
            debug!(url = %stub.url, "No article body extracted");
        }
        let date = page.published.unwrap_or_else(|| today.to_string());
        Record::new(self.profile.source, stub.title, stub.url, date, page.content)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::http::Page;
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned pages; unknown URLs are 404, `fail` URLs are transport errors.
    #[derive(Default)]
    pub(crate) struct StubClient {
        pages: HashMap<String, String>,
        fail: Vec<String>,
        pub requests: Mutex<Vec<String>>,
    }

    impl StubClient {
        pub fn page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }

        pub fn failing(mut self, url: &str) -> Self {
            self.fail.push(url.to_string());
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageClient for StubClient {
        async fn get(&self, url: &str) -> Result<Page, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            if self.fail.iter().any(|u| u == url) {
                return Err(FetchError::Status(0));
            }
            Ok(match self.pages.get(url) {
                Some(body) => Page::ok(body.clone()),
                None => Page {
                    status: 404,
                    body: String::new(),
                },
            })
        }
    }

    pub(crate) fn mc_listing(links: &[(&str, &str)]) -> String {
        let items: String = links
            .iter()
            .map(|(href, title)| format!(r#"<li class="clearfix"><a href="{href}">img</a><h2>{title}</h2></li>"#))
            .collect();
        format!("<html><body><ul>{items}</ul></body></html>")
    }

    pub(crate) fn mc_article(text: &str) -> String {
        format!(r#"<html><body><div class="article_page"><p>{text}</p></div></body></html>"#)
    }

    fn single_category() -> SourceProfile {
        SourceProfile {
            categories: &["markets"],
            ..moneycontrol::profile()
        }
    }

    const P1: &str = "https://www.moneycontrol.com/news/markets/";
    const P2: &str = "https://www.moneycontrol.com/news/markets/page-2/";
    const P3: &str = "https://www.moneycontrol.com/news/markets/page-3/";

    #[tokio::test]
    async fn test_non_200_page_ends_pagination() {
        let client = Arc::new(
            StubClient::default()
                .page(P1, &mc_listing(&[("/news/a.html", "A"), ("/news/b.html", "B")]))
                .page("https://www.moneycontrol.com/news/a.html", &mc_article("alpha"))
                .page("https://www.moneycontrol.com/news/b.html", &mc_article("beta"))
                .page(P3, &mc_listing(&[("/news/c.html", "C")])),
        );
        let fetcher = Fetcher::new(single_category(), client.clone(), 5).unwrap();
        let records: Vec<Record> = fetcher.fetch().collect().await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "A");
        assert_eq!(records[0].content, "alpha");
        assert_eq!(records[1].url, "https://www.moneycontrol.com/news/b.html");
        assert!(records.iter().all(|r| r.scraped_at.is_none()));
        assert!(client.requested().contains(&P2.to_string()));
        assert!(!client.requested().contains(&P3.to_string()));
    }

    #[tokio::test]
    async fn test_empty_listing_ends_pagination() {
        let client = Arc::new(
            StubClient::default()
                .page(P1, &mc_listing(&[("/news/a.html", "A")]))
                .page(P2, "<html><body><p>nothing here</p></body></html>")
                .page(P3, &mc_listing(&[("/news/c.html", "C")])),
        );
        let fetcher = Fetcher::new(single_category(), client.clone(), 5).unwrap();
        let records: Vec<Record> = fetcher.fetch().collect().await;
        assert_eq!(records.len(), 1);
        assert!(!client.requested().contains(&P3.to_string()));
    }

    #[tokio::test]
    async fn test_listing_error_moves_to_next_category() {
        let profile = SourceProfile {
            categories: &["markets", "economy"],
            ..moneycontrol::profile()
        };
        let client = Arc::new(
            StubClient::default()
                .failing(P1)
                .page(
                    "https://www.moneycontrol.com/news/economy/",
                    &mc_listing(&[("/news/e.html", "E")]),
                ),
        );
        let fetcher = Fetcher::new(profile, client, 1).unwrap();
        let records: Vec<Record> = fetcher.fetch().collect().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "E");
    }

    #[tokio::test]
    async fn test_failed_article_is_kept_with_empty_content() {
        let client = Arc::new(
            StubClient::default()
                .page(P1, &mc_listing(&[("/news/a.html", "A"), ("/news/b.html", "B")]))
                .failing("https://www.moneycontrol.com/news/a.html")
                .page("https://www.moneycontrol.com/news/b.html", &mc_article("beta")),
        );
        let fetcher = Fetcher::new(single_category(), client, 1).unwrap();
        let records: Vec<Record> = fetcher.fetch().collect().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "");
        assert_eq!(records[1].content, "beta");
        let today = Local::now().format("%Y-%m-%d").to_string();
        assert_eq!(records[0].published_date, today);
    }

    #[tokio::test]
    async fn test_fetch_is_lazy_and_restartable() {
        let client = Arc::new(
            StubClient::default()
                .page(P1, &mc_listing(&[("/news/a.html", "A"), ("/news/b.html", "B")]))
                .page("https://www.moneycontrol.com/news/a.html", &mc_article("alpha")),
        );
        let fetcher = Fetcher::new(single_category(), client.clone(), 3).unwrap();
        let first: Vec<Record> = fetcher.fetch().take(1).collect().await;
        assert_eq!(first.len(), 1);
        assert_eq!(client.requested().len(), 2);

        let again: Vec<Record> = fetcher.fetch().collect().await;
        assert_eq!(again.len(), 2);
        assert_eq!(again[0], first[0]);
    }

    #[tokio::test]
    async fn test_livemint_profile_walks_from_page_two() {
        let client = Arc::new(
            StubClient::default()
                .page(
                    "https://www.livemint.com/latest-news/page-2",
                    r#"<div class="headlineSec"><a href="/market/x.html">Rupee</a></div>"#,
                )
                .page(
                    "https://www.livemint.com/market/x.html",
                    r#"<meta property="article:published_time" content="2024-01-15T08:00:00Z"><div class="contentSec"><p>Body</p></div>"#,
                ),
        );
        let profile = SourceProfile {
            politeness: Politeness::NONE,
            ..livemint::profile()
        };
        let fetcher = Fetcher::new(profile, client.clone(), 2).unwrap();
        let records: Vec<Record> = fetcher.fetch().collect().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, Source::LiveMint);
        assert_eq!(records[0].published_date, "2024-01-15");
        assert_eq!(records[0].content, "Body");
        assert_eq!(client.requested()[0], "https://www.livemint.com/latest-news/page-2");
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let profile = SourceProfile {
            item_selector: "li[",
            ..moneycontrol::profile()
        };
        let err = Fetcher::new(profile, Arc::new(StubClient::default()), 1).err().unwrap();
        assert!(matches!(err, FetchError::InvalidSelector(_)));
    }
}
