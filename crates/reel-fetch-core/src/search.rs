//! Torrent-index search
//!
//! Queries a single index site, walks its result rows and resolves each
//! row's detail page to a magnet link. Only the initial search request can
//! fail the whole search; everything per-row is skipped and logged.

use crate::error::{Error, Result};
use crate::magnet::info_hash_from_magnet;
use crate::scrape::{self, ListingRow};
use crate::types::{SearchResult, Settings};
use reqwest::{StatusCode, Url};
use std::time::Duration;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(2);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Searcher configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub source_name: String,
    pub default_limit: usize,
    pub search_timeout: Duration,
    pub detail_timeout: Duration,
    pub request_delay: Duration,
    pub user_agent: String,
}

impl From<&Settings> for SearchConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            base_url: settings.search_base_url.clone(),
            source_name: settings.search_source_name.clone(),
            default_limit: settings.search_limit,
            search_timeout: Duration::from_millis(settings.search_timeout_ms),
            detail_timeout: Duration::from_millis(settings.detail_timeout_ms),
            request_delay: Duration::from_millis(settings.request_delay_ms),
            user_agent: settings.user_agent.clone(),
        }
    }
}

/// Scrapes one torrent index for magnet links
#[derive(Debug, Clone)]
pub struct ContentSearcher {
    client: reqwest::Client,
    config: SearchConfig,
}

impl ContentSearcher {
    pub fn new(config: SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn default_limit(&self) -> usize {
        self.config.default_limit
    }

    /// Search for `query`, returning at most `limit` results that carry a magnet
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("search query is empty".to_string()));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let url = self.search_url(query)?;
        log::info!("Searching {} for '{}'", self.config.source_name, query);

        let page = fetch_page(&self.client, url.clone(), self.config.search_timeout).await?;
        let Some(rows) = scrape::parse_listing(&page) else {
            log::info!("No results table for '{}'", query);
            return Ok(Vec::new());
        };

        // Twice the limit, to make up for rows whose detail page is unusable
        let mut results = Vec::with_capacity(limit);
        for row in rows.into_iter().take(limit.saturating_mul(2)) {
            if results.len() >= limit {
                break;
            }
            tokio::time::sleep(self.config.request_delay).await;

            match self.resolve_row(&url, &row).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => log::debug!("No usable magnet for '{}'", row.title),
                Err(e) => log::warn!("Skipping result '{}': {}", row.title, e),
            }
        }

        log::info!("Search for '{}' found {} results", query, results.len());
        Ok(results)
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| Error::InvalidInput(format!("search base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput("search base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(["search", query, "1", ""]);
        Ok(url)
    }

    async fn resolve_row(&self, listing_url: &Url, row: &ListingRow) -> Result<Option<SearchResult>> {
        let detail_url = listing_url
            .join(&row.detail_href)
            .map_err(|e| Error::Parse(format!("detail link '{}': {}", row.detail_href, e)))?;

        let page = fetch_page(&self.client, detail_url, self.config.detail_timeout).await?;
        let Some(magnet_uri) = scrape::find_magnet(&page) else {
            return Ok(None);
        };
        let Some(info_hash) = info_hash_from_magnet(&magnet_uri) else {
            return Ok(None);
        };

        Ok(Some(SearchResult {
            year: scrape::year_from_title(&row.title),
            quality: scrape::quality_from_title(&row.title),
            title: row.title.clone(),
            size: row.size.clone(),
            seeders: row.seeders,
            peers: row.leechers,
            magnet_uri,
            info_hash,
            source: self.config.source_name.clone(),
            rating: None,
        }))
    }
}

/// GET a page as text, retrying once when the server rate-limits us
pub(crate) async fn fetch_page(
    client: &reqwest::Client,
    url: Url,
    timeout: Duration,
) -> Result<String> {
    let mut retried = false;
    loop {
        let response = client.get(url.clone()).timeout(timeout).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS && !retried {
            let delay = retry_after(&response);
            log::warn!("Rate limited by {}, retrying in {:?}", url, delay);
            tokio::time::sleep(delay).await;
            retried = true;
            continue;
        }
        if !status.is_success() {
            return Err(Error::Network(format!("HTTP {} from {}", status, url)));
        }
        return Ok(response.text().await?);
    }
}

fn retry_after(response: &reqwest::Response) -> Duration {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
        .min(MAX_RETRY_AFTER)
}
