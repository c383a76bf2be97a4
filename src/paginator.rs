//! # Chunked Paginator
//!
//! Drives "fetch page 0, then keep fetching while more pages exist" over the
//! [`DiskCache`] and [`RateLimitedTransport`]. Pages of one request are
//! strictly sequential because the parameters of page N+1 may depend on the
//! response of page N (offset or continuation token).
//!
//! Two consumption styles are offered: [`ChunkedPaginator::pages`] returns a
//! lazy [`Pages`] sequence, and [`ChunkedPaginator::paginate`] pushes each
//! page into a [`ChunkHandler`] and waits for it before advancing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::DiskCache;
use crate::error::SyncError;
use crate::transport::RateLimitedTransport;

/// Raw page as returned upstream, plus continuation state taken from headers.
///
/// This is the unit stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub body: Value,
    #[serde(default)]
    pub continuation_token: Option<String>,
}

/// One decoded page handed to consumers.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub index: u32,
    pub items: Vec<T>,
    /// Continuation state for the next page, if upstream supplied one.
    pub continuation: Option<String>,
}

/// Describes how to fetch and decode the pages of one paginated resource.
pub trait PageRequest: Send + Sync {
    type Item: DeserializeOwned + Send;

    /// Identifies the request in logs and errors.
    fn entity_key(&self) -> String;

    fn url(&self) -> String;

    /// Query parameters for page `index`; `previous` is `None` for page 0.
    fn params(&self, index: u32, previous: Option<&FetchedPage>) -> Vec<(String, String)>;

    fn headers(&self, previous: Option<&FetchedPage>) -> HeaderMap;

    /// Whether another page follows `page`.
    fn has_another_page(&self, index: u32, page: &FetchedPage) -> bool;

    fn cache_key(&self, index: u32, previous: Option<&FetchedPage>) -> Vec<String>;

    /// Decode the items of a page.
    fn items(&self, page: &FetchedPage) -> Result<Vec<Self::Item>, SyncError>;

    /// Response header carrying the continuation token, if any.
    fn continuation_header(&self) -> Option<&str> {
        None
    }

    fn verify_tls(&self) -> bool {
        true
    }
}

/// Per-page consumer for [`ChunkedPaginator::paginate`].
#[async_trait]
pub trait ChunkHandler<T: Send>: Send {
    async fn on_chunk(&mut self, page: Page<T>) -> Result<(), SyncError>;
}

/// Pagination settings shared by every request.
#[derive(Debug, Clone)]
pub struct PaginatorSettings {
    pub cache_ttl: Duration,
    pub timeout: Option<Duration>,
    pub max_pages: u32,
}

impl Default for PaginatorSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            timeout: None,
            max_pages: 10_000,
        }
    }
}

#[derive(Clone)]
pub struct ChunkedPaginator {
    transport: RateLimitedTransport,
    cache: DiskCache,
    settings: PaginatorSettings,
}

impl ChunkedPaginator {
    pub fn new(transport: RateLimitedTransport, cache: DiskCache, settings: PaginatorSettings) -> Self {
        Self {
            transport,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &PaginatorSettings {
        &self.settings
    }

    /// Lazy page sequence for `request`; calling again restarts from page 0.
    pub fn pages<'a, R: PageRequest>(&'a self, request: &'a R) -> Pages<'a, R> {
        Pages {
            paginator: self,
            request,
            index: 0,
            previous: None,
            finished: false,
        }
    }

    /// Feed every page to `handler` in order. Returns the number of pages.
    ///
    /// Errors from the transport, the cache or the handler stop pagination
    /// and are returned unchanged.
    pub async fn paginate<R, H>(&self, request: &R, handler: &mut H) -> Result<u32, SyncError>
    where
        R: PageRequest,
        H: ChunkHandler<R::Item>,
    {
        let mut pages = self.pages(request);
        let mut count = 0;
        while let Some(page) = pages.next().await? {
            handler.on_chunk(page).await?;
            count += 1;
        }
        Ok(count)
    }

    async fn fetch_page<R: PageRequest>(
        &self,
        request: &R,
        index: u32,
        previous: Option<&FetchedPage>,
    ) -> Result<FetchedPage, SyncError> {
        let key = request.cache_key(index, previous);
        let url = request.url();
        let params = request.params(index, previous);
        let headers = request.headers(previous);

        self.cache
            .using_cache(&key, self.settings.cache_ttl, || async {
                let response = self
                    .transport
                    .get(
                        &url,
                        &params,
                        &headers,
                        self.settings.timeout,
                        request.verify_tls(),
                    )
                    .await?;

                let body: Value = if response.body.trim().is_empty() {
                    Value::Null
                } else {
                    response.json()?
                };
                let continuation_token = request
                    .continuation_header()
                    .and_then(|name| response.header(name))
                    .filter(|token| !token.is_empty())
                    .map(str::to_string);

                Ok::<_, SyncError>(FetchedPage {
                    body,
                    continuation_token,
                })
            })
            .await
    }
}

/// Finite sequence of pages, fetched on demand.
pub struct Pages<'a, R: PageRequest> {
    paginator: &'a ChunkedPaginator,
    request: &'a R,
    index: u32,
    previous: Option<FetchedPage>,
    finished: bool,
}

impl<R: PageRequest> Pages<'_, R> {
    /// Fetch the next page, or `None` once the last page has been returned.
    pub async fn next(&mut self) -> Result<Option<Page<R::Item>>, SyncError> {
        if self.finished {
            return Ok(None);
        }

        let max_pages = self.paginator.settings.max_pages;
        if self.index >= max_pages {
            self.finished = true;
            return Err(SyncError::PageLimitExceeded {
                entity_key: self.request.entity_key(),
                max_pages,
            });
        }

        let index = self.index;
        let fetched = self
            .paginator
            .fetch_page(self.request, index, self.previous.as_ref())
            .await;
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        let items = self.request.items(&fetched)?;
        let more = self.request.has_another_page(index, &fetched);
        debug!(
            entity_key = %self.request.entity_key(),
            page = index,
            items = items.len(),
            more,
            "Fetched page"
        );

        let page = Page {
            index,
            items,
            continuation: fetched.continuation_token.clone(),
        };

        self.finished = !more;
        self.index += 1;
        self.previous = Some(fetched);

        Ok(Some(page))
    }
}
