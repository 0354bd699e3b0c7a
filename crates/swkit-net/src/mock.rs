//! In-memory [`Fetcher`] for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;

use crate::{cache_key, Fetcher, NetError, Request, Response};

/// Serves canned responses by URL; unknown URLs and offline mode fail.
#[derive(Debug, Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with `status` at `url`.
    pub fn route(&self, url: &str, status: StatusCode, body: impl Into<Bytes>) -> &Self {
        self.route_response(url, Response::new(status, body))
    }

    /// Serve a full response at `url`.
    pub fn route_response(&self, url: &str, response: Response) -> &Self {
        let key = url::Url::parse(url)
            .map(|u| cache_key(&u))
            .unwrap_or_else(|_| url.to_string());
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, response);
        self
    }

    /// Toggle simulated network loss.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }

        let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes
            .get(&request.cache_key())
            .cloned()
            .map(|mut response| {
                response.url = Some(request.url.clone());
                response
            })
            .ok_or_else(|| NetError::RequestFailed(format!("no route for {}", request.url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fetcher_routes_and_offline() {
        let fetcher = MockFetcher::new();
        fetcher.route("https://example.com/", StatusCode::OK, "shell");

        let request = Request::parse("https://example.com/").unwrap();
        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.text().unwrap(), "shell");

        fetcher.set_offline(true);
        assert!(matches!(
            fetcher.fetch(&request).await,
            Err(NetError::Offline)
        ));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_fetcher_unknown_route_fails() {
        let fetcher = MockFetcher::new();
        let request = Request::parse("https://example.com/nope").unwrap();
        assert!(fetcher.fetch(&request).await.is_err());
    }
}
