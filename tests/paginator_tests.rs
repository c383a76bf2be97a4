//! ChunkedPaginator behavior against a mock upstream.

mod test_utils;

use std::time::Duration;

use async_trait::async_trait;
use devsync::error::SyncError;
use devsync::paginator::{ChunkHandler, FetchedPage, Page, PageRequest};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use test_utils::test_paginator;

#[derive(Debug, Deserialize)]
struct Item {
    id: u32,
}

/// Page-numbered collection; the body's `more` flag says whether another page follows.
struct NumberedPages {
    base: String,
}

impl PageRequest for NumberedPages {
    type Item = Item;

    fn entity_key(&self) -> String {
        "acme:numbers".to_string()
    }

    fn url(&self) -> String {
        format!("{}/items", self.base)
    }

    fn params(&self, index: u32, _previous: Option<&FetchedPage>) -> Vec<(String, String)> {
        vec![("page".to_string(), index.to_string())]
    }

    fn headers(&self, _previous: Option<&FetchedPage>) -> HeaderMap {
        HeaderMap::new()
    }

    fn has_another_page(&self, _index: u32, page: &FetchedPage) -> bool {
        page.body["more"].as_bool().unwrap_or(false)
    }

    fn cache_key(&self, index: u32, _previous: Option<&FetchedPage>) -> Vec<String> {
        vec!["acme".to_string(), "numbers".to_string(), format!("page-{}", index)]
    }

    fn items(&self, page: &FetchedPage) -> Result<Vec<Item>, SyncError> {
        Ok(serde_json::from_value(page.body["items"].clone())?)
    }
}

/// Token-chained collection; the token arrives in a response header.
struct TokenPages {
    base: String,
}

impl PageRequest for TokenPages {
    type Item = Item;

    fn entity_key(&self) -> String {
        "acme:tokens".to_string()
    }

    fn url(&self) -> String {
        format!("{}/tokens", self.base)
    }

    fn params(&self, _index: u32, previous: Option<&FetchedPage>) -> Vec<(String, String)> {
        previous
            .and_then(|p| p.continuation_token.clone())
            .map(|token| vec![("continuationToken".to_string(), token)])
            .unwrap_or_default()
    }

    fn headers(&self, _previous: Option<&FetchedPage>) -> HeaderMap {
        HeaderMap::new()
    }

    fn has_another_page(&self, _index: u32, page: &FetchedPage) -> bool {
        page.continuation_token.is_some()
    }

    fn cache_key(&self, index: u32, _previous: Option<&FetchedPage>) -> Vec<String> {
        vec!["acme".to_string(), "tokens".to_string(), format!("page-{}", index)]
    }

    fn items(&self, page: &FetchedPage) -> Result<Vec<Item>, SyncError> {
        Ok(serde_json::from_value(page.body["items"].clone())?)
    }

    fn continuation_header(&self) -> Option<&str> {
        Some("x-ms-continuationtoken")
    }
}

#[derive(Default)]
struct Recorder {
    pages: Vec<(u32, Vec<u32>)>,
}

#[async_trait]
impl ChunkHandler<Item> for Recorder {
    async fn on_chunk(&mut self, page: Page<Item>) -> Result<(), SyncError> {
        self.pages
            .push((page.index, page.items.iter().map(|item| item.id).collect()));
        Ok(())
    }
}

async fn mount_three_pages(server: &MockServer, expected_calls: u64) {
    for (page, more) in [(0u32, true), (1, true), (2, false)] {
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "id": page * 10 }, { "id": page * 10 + 1 }],
                "more": more
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn invokes_handler_once_per_page_in_order() {
    let server = MockServer::start().await;
    mount_three_pages(&server, 1).await;
    let cache_dir = TempDir::new().unwrap();

    let paginator = test_paginator(cache_dir.path(), Duration::ZERO);
    let request = NumberedPages { base: server.uri() };
    let mut recorder = Recorder::default();

    let pages = paginator.paginate(&request, &mut recorder).await.unwrap();

    assert_eq!(pages, 3);
    assert_eq!(
        recorder.pages,
        vec![(0, vec![0, 1]), (1, vec![10, 11]), (2, vec![20, 21])]
    );
}

#[tokio::test]
async fn lazy_sequence_is_restartable() {
    let server = MockServer::start().await;
    mount_three_pages(&server, 2).await;
    let cache_dir = TempDir::new().unwrap();

    let paginator = test_paginator(cache_dir.path(), Duration::ZERO);
    let request = NumberedPages { base: server.uri() };

    for _ in 0..2 {
        let mut pages = paginator.pages(&request);
        let mut seen = Vec::new();
        while let Some(page) = pages.next().await.unwrap() {
            seen.push(page.index);
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(pages.next().await.unwrap().is_none());
    }
}

#[tokio::test]
async fn cached_pages_skip_the_upstream_within_ttl() {
    let server = MockServer::start().await;
    mount_three_pages(&server, 1).await;
    let cache_dir = TempDir::new().unwrap();

    let paginator = test_paginator(cache_dir.path(), Duration::from_secs(600));
    let request = NumberedPages { base: server.uri() };

    let mut first = Recorder::default();
    paginator.paginate(&request, &mut first).await.unwrap();
    let mut second = Recorder::default();
    paginator.paginate(&request, &mut second).await.unwrap();

    assert_eq!(first.pages, second.pages);
    assert!(cache_dir.path().join("acme__numbers__page-0.json").exists());
}

#[tokio::test]
async fn follows_continuation_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tokens"))
        .and(query_param("continuationToken", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [{ "id": 2 }] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tokens"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-continuationtoken", "abc")
                .set_body_json(json!({ "items": [{ "id": 1 }] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let paginator = test_paginator(cache_dir.path(), Duration::ZERO);
    let mut recorder = Recorder::default();

    let pages = paginator
        .paginate(&TokenPages { base: server.uri() }, &mut recorder)
        .await
        .unwrap();

    assert_eq!(pages, 2);
    assert_eq!(recorder.pages, vec![(0, vec![1]), (1, vec![2])]);
}

#[tokio::test]
async fn transport_errors_stop_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "items": [{ "id": 0 }], "more": true })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let paginator = test_paginator(cache_dir.path(), Duration::ZERO);
    let mut recorder = Recorder::default();

    let err = paginator
        .paginate(&NumberedPages { base: server.uri() }, &mut recorder)
        .await
        .unwrap_err();

    match err {
        SyncError::Transport(transport) => assert_eq!(transport.status(), Some(503)),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(recorder.pages.len(), 1);
}

#[tokio::test]
async fn page_limit_guards_runaway_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "items": [], "more": true })),
        )
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let paginator = test_paginator(cache_dir.path(), Duration::ZERO);
    let mut recorder = Recorder::default();

    let err = paginator
        .paginate(&NumberedPages { base: server.uri() }, &mut recorder)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::PageLimitExceeded { max_pages: 50, .. }
    ));
    assert_eq!(recorder.pages.len(), 50);
}
