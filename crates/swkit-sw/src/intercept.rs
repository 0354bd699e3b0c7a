//! Network-first fetch policy with a cache/offline fallback chain.

use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use swkit_cache::CacheStoreManager;
use swkit_net::{Fetcher, InterceptAction, RequestFilter, Response};
use tracing::{debug, warn};
use url::Url;

use crate::events::{FetchDisposition, FetchEvent};

/// The terminal response when neither network nor cache can answer.
pub fn offline_response() -> Response {
    Response::new(StatusCode::SERVICE_UNAVAILABLE, "Offline")
        .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
}

/// Applies the fetch policy for one coordinator version.
///
/// Stateless across requests; every fetch event is handled independently.
pub struct FetchInterceptor {
    filter: RequestFilter,
    cache: CacheStoreManager,
    fetcher: Arc<dyn Fetcher>,
    offline_url: Url,
    root_url: Url,
}

impl FetchInterceptor {
    pub fn new(
        filter: RequestFilter,
        cache: CacheStoreManager,
        fetcher: Arc<dyn Fetcher>,
        offline_url: Url,
        root_url: Url,
    ) -> Self {
        Self {
            filter,
            cache,
            fetcher,
            offline_url,
            root_url,
        }
    }

    pub async fn handle(&self, event: &FetchEvent) -> FetchDisposition {
        let request = &event.request;

        if let InterceptAction::Bypass(reason) = self.filter.classify(request) {
            debug!(url = %request.url, reason = ?reason, "Passing request through");
            return FetchDisposition::Passthrough(reason);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.status == StatusCode::OK {
                    let cache = self.cache.clone();
                    let request = request.clone();
                    let snapshot = response.clone();
                    event.wait_until(async move {
                        if let Err(e) = cache.put(&request, &snapshot).await {
                            warn!(url = %request.url, error = %e, "Cache write failed");
                        }
                    });
                }
                FetchDisposition::Respond(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, falling back");
                FetchDisposition::Respond(self.fallback(event).await)
            }
        }
    }

    async fn fallback(&self, event: &FetchEvent) -> Response {
        let request = &event.request;

        if let Some(cached) = self.cache.match_request(request).await {
            debug!(url = %request.url, "Serving from cache");
            return cached;
        }

        if request.is_navigation() {
            if let Some(page) = self.cache.match_url(&self.offline_url).await {
                debug!(url = %request.url, "Serving offline page");
                return page;
            }
            if let Some(root) = self.cache.match_url(&self.root_url).await {
                debug!(url = %request.url, "Serving cached root document");
                return root;
            }
        }

        debug!(url = %request.url, "No fallback available");
        offline_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swkit_cache::{CacheStorage, CacheVersion};
    use swkit_net::mock::MockFetcher;
    use swkit_net::Request;
    use tokio::sync::RwLock;

    const ORIGIN: &str = "https://app.example.com";

    struct Harness {
        fetcher: Arc<MockFetcher>,
        cache: CacheStoreManager,
        interceptor: FetchInterceptor,
    }

    fn harness() -> Harness {
        let fetcher = Arc::new(MockFetcher::new());
        let storage = Arc::new(RwLock::new(CacheStorage::new()));
        let cache = CacheStoreManager::new(CacheVersion::new("dashboard", "1"), storage);
        let interceptor = FetchInterceptor::new(
            RequestFilter::default(),
            cache.clone(),
            fetcher.clone(),
            Url::parse(&format!("{ORIGIN}/offline")).unwrap(),
            Url::parse(&format!("{ORIGIN}/")).unwrap(),
        );
        Harness {
            fetcher,
            cache,
            interceptor,
        }
    }

    fn respond(disposition: FetchDisposition) -> Response {
        match disposition {
            FetchDisposition::Respond(response) => response,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    async fn seed(cache: &CacheStoreManager, path: &str, body: &'static str) {
        let request = Request::parse(&format!("{ORIGIN}{path}")).unwrap();
        cache
            .put(&request, &Response::new(StatusCode::OK, body))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_requests_never_touch_cache() {
        let h = harness();
        h.fetcher.set_offline(true);

        let event = FetchEvent::new(Request::parse(&format!("{ORIGIN}/api/projects")).unwrap());
        let disposition = h.interceptor.handle(&event).await;

        assert!(matches!(disposition, FetchDisposition::Passthrough(_)));
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(h.cache.stats().reads(), 0);
        assert_eq!(h.cache.stats().writes(), 0);
    }

    #[tokio::test]
    async fn test_network_success_is_returned_and_cached() {
        let h = harness();
        h.fetcher
            .route(&format!("{ORIGIN}/app.js"), StatusCode::OK, "console.log(1)");

        let request = Request::parse(&format!("{ORIGIN}/app.js")).unwrap();
        let event = FetchEvent::new(request.clone());
        let response = respond(h.interceptor.handle(&event).await);
        assert_eq!(response.text().unwrap(), "console.log(1)");

        event.pending().settle().await;
        let cached = h.cache.match_request(&request).await.unwrap();
        assert_eq!(cached.body, response.body);
    }

    #[tokio::test]
    async fn test_non_200_success_is_not_cached() {
        let h = harness();
        h.fetcher
            .route(&format!("{ORIGIN}/empty"), StatusCode::NO_CONTENT, "");

        let request = Request::parse(&format!("{ORIGIN}/empty")).unwrap();
        let event = FetchEvent::new(request.clone());
        let response = respond(h.interceptor.handle(&event).await);
        assert_eq!(response.status, StatusCode::NO_CONTENT);

        assert!(event.pending().is_empty());
        assert_eq!(h.cache.stats().writes(), 0);
    }

    #[tokio::test]
    async fn test_network_failure_serves_cached_entry() {
        let h = harness();
        seed(&h.cache, "/app.css", "body{}").await;
        h.fetcher.set_offline(true);

        let event = FetchEvent::new(Request::parse(&format!("{ORIGIN}/app.css")).unwrap());
        let response = respond(h.interceptor.handle(&event).await);
        assert_eq!(response.text().unwrap(), "body{}");
    }

    #[tokio::test]
    async fn test_offline_navigation_serves_offline_page() {
        let h = harness();
        seed(&h.cache, "/", "shell").await;
        seed(&h.cache, "/offline", "you are offline").await;
        h.fetcher.set_offline(true);

        let request = Request::navigate(Url::parse(&format!("{ORIGIN}/projects/9")).unwrap());
        let response = respond(h.interceptor.handle(&FetchEvent::new(request)).await);
        assert_eq!(response.text().unwrap(), "you are offline");
    }

    #[tokio::test]
    async fn test_offline_navigation_falls_back_to_root() {
        let h = harness();
        seed(&h.cache, "/", "shell").await;
        h.fetcher.set_offline(true);

        let request = Request::navigate(Url::parse(&format!("{ORIGIN}/domains")).unwrap());
        let response = respond(h.interceptor.handle(&FetchEvent::new(request)).await);
        assert_eq!(response.text().unwrap(), "shell");
    }

    #[tokio::test]
    async fn test_offline_subresource_gets_503() {
        let h = harness();
        seed(&h.cache, "/offline", "you are offline").await;
        h.fetcher.set_offline(true);

        let event = FetchEvent::new(Request::parse(&format!("{ORIGIN}/logo.png")).unwrap());
        let response = respond(h.interceptor.handle(&event).await);

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(response.text().unwrap(), "Offline");
    }

    #[tokio::test]
    async fn test_cache_write_failure_is_swallowed() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route(&format!("{ORIGIN}/big.bin"), StatusCode::OK, vec![0u8; 64]);
        let storage = Arc::new(RwLock::new(CacheStorage::with_quota(16)));
        let cache = CacheStoreManager::new(CacheVersion::new("dashboard", "1"), storage);
        let interceptor = FetchInterceptor::new(
            RequestFilter::default(),
            cache.clone(),
            fetcher,
            Url::parse(&format!("{ORIGIN}/offline")).unwrap(),
            Url::parse(&format!("{ORIGIN}/")).unwrap(),
        );

        let request = Request::parse(&format!("{ORIGIN}/big.bin")).unwrap();
        let event = FetchEvent::new(request.clone());
        let response = respond(interceptor.handle(&event).await);
        assert_eq!(response.body.len(), 64);

        event.pending().settle().await;
        assert!(cache.match_request(&request).await.is_none());
    }
}
