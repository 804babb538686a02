use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::config::SourceConfig;
use crate::domain::article::Article;
use crate::domain::source::ArticleSource;
use crate::error::{RagError, RagResult};
use crate::retry::{Backoff, RetryError, RetryPolicy};

/// The provider blocks clients that look like bots; a browser-shaped request
/// is part of the contract in practice.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

fn year_regex() -> &'static Regex {
    static YEAR_RE: OnceLock<Regex> = OnceLock::new();
    YEAR_RE.get_or_init(|| Regex::new(r"\d{4}").expect("static year pattern"))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector '{}': {:?}", css, e))
}

/// Paginated article source scraping a Google-Scholar-style result page.
pub struct ScholarSource {
    client: reqwest::Client,
    config: SourceConfig,
    page_retry: RetryPolicy,
    entry_selector: Selector,
    title_selector: Selector,
    link_selector: Selector,
    snippet_selector: Selector,
    meta_selector: Selector,
}

impl ScholarSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build scholar HTTP client")?;

        // Page retries back off longer than the inter-page delay; validated
        // at config load.
        let page_retry = RetryPolicy::new(
            config.max_retries + 1,
            Duration::from_millis(config.retry_delay_ms),
            Backoff::Fixed,
        );

        Ok(Self {
            client,
            config,
            page_retry,
            entry_selector: selector(".gs_r.gs_scl")?,
            title_selector: selector(".gs_rt")?,
            link_selector: selector("a")?,
            snippet_selector: selector(".gs_rs")?,
            meta_selector: selector(".gs_a")?,
        })
    }

    async fn fetch_page(&self, query: &str, start: usize) -> Result<String> {
        let url = format!("{}/scholar", self.config.base_url);
        let start_param = start.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("start", start_param.as_str()),
                ("hl", "en"),
                ("as_sdt", "0,5"),
            ])
            .send()
            .await
            .context("scholar page request failed")?
            .error_for_status()
            .context("scholar page returned an error status")?;
        response
            .text()
            .await
            .context("failed to read scholar page body")
    }

    /// Parses all result entries on one page. A single malformed entry is
    /// dropped (logged), never the whole page.
    fn parse_page(&self, html: &str) -> Vec<Article> {
        let document = Html::parse_document(html);
        let mut articles = Vec::new();
        for element in document.select(&self.entry_selector) {
            match self.parse_entry(&element) {
                Some(article) => articles.push(article),
                None => log::warn!("Dropping unparseable result entry"),
            }
        }
        articles
    }

    /// A title is the only hard requirement; everything else degrades to
    /// empty/absent fields so one shifted selector never starves a page.
    fn parse_entry(&self, element: &ElementRef) -> Option<Article> {
        let title_element = element.select(&self.title_selector).next()?;
        let title = title_element.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            return None;
        }

        let url = title_element
            .select(&self.link_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);

        let abstract_text = element
            .select(&self.snippet_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let meta_text = element
            .select(&self.meta_selector)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default();
        let (authors, year, publication) = parse_meta_text(&meta_text);

        Some(Article {
            title,
            abstract_text,
            url,
            authors,
            year,
            publication,
        })
    }
}

/// Splits the "Authors - Publication, Year - Publisher" byline. Missing or
/// malformed segments yield empty/absent fields.
fn parse_meta_text(meta: &str) -> (String, Option<String>, String) {
    let mut parts = meta.split(" - ");
    let authors = parts.next().unwrap_or("").trim().to_string();
    let venue = parts.next().unwrap_or("");
    let year = year_regex().find(venue).map(|m| m.as_str().to_string());
    let publication = venue
        .split(',')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    (authors, year, publication)
}

#[async_trait]
impl ArticleSource for ScholarSource {
    async fn fetch(
        &self,
        query: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> RagResult<Vec<Article>> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }

        let mut articles: Vec<Article> = Vec::new();
        if count == 0 {
            return Ok(articles);
        }

        let mut start = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RagError::Cancelled);
            }

            let html = self
                .page_retry
                .run(cancel, |_| true, |_attempt| self.fetch_page(query, start))
                .await
                .map_err(|err| match err {
                    RetryError::Cancelled => RagError::Cancelled,
                    RetryError::Exhausted { attempts, last } => RagError::SourceUnavailable {
                        attempts,
                        reason: format!("{:#}", last),
                    },
                    RetryError::Fatal(e) => RagError::SourceUnavailable {
                        attempts: 1,
                        reason: format!("{:#}", e),
                    },
                })?;

            let page_articles = self.parse_page(&html);
            if page_articles.is_empty() {
                log::info!("No more results at offset {}; stopping pagination", start);
                break;
            }

            for article in page_articles {
                if articles.len() >= count {
                    break;
                }
                articles.push(article);
            }
            if articles.len() >= count {
                break;
            }

            start += self.config.page_size;

            // Mandatory pause between pages; the provider rate-limits
            // implicitly and blocks clients that skip it.
            tokio::select! {
                _ = cancel.cancelled() => return Err(RagError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)) => {}
            }
        }

        log::info!("Fetched {} articles for query '{}'", articles.len(), query);
        Ok(articles)
    }
}
