//! Request classification: which requests the coordinator may handle.

use http::Method;
use tracing::trace;
use url::Url;

use crate::Request;

/// Decision for an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptAction {
    /// The coordinator applies its fetch policy.
    Handle,
    /// Let the request go to the network untouched.
    Bypass(BypassReason),
}

/// Why a request bypasses the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassReason {
    /// Not a GET.
    NonReadMethod,
    /// Matched a bypass pattern (API calls by default).
    Pattern(String),
    /// `ws:` or `wss:`.
    WebSocket,
    /// Anything other than `http:`/`https:`.
    UnsupportedScheme(String),
}

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    /// Pattern type.
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Exact URL match.
    Exact,
    /// Prefix match.
    Prefix,
    /// Suffix match.
    Suffix,
    /// Contains substring.
    Contains,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self {
            pattern_type: PatternType::Exact,
            pattern: url.to_string(),
        }
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            pattern_type: PatternType::Prefix,
            pattern: prefix.to_string(),
        }
    }

    /// Create a suffix match pattern.
    pub fn suffix(suffix: &str) -> Self {
        Self {
            pattern_type: PatternType::Suffix,
            pattern: suffix.to_string(),
        }
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self {
            pattern_type: PatternType::Contains,
            pattern: substring.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self.pattern_type {
            PatternType::Exact => url_str == self.pattern,
            PatternType::Prefix => url_str.starts_with(&self.pattern),
            PatternType::Suffix => url_str.ends_with(&self.pattern),
            PatternType::Contains => url_str.contains(&self.pattern),
        }
    }
}

/// Classifies requests before the coordinator's fetch policy runs.
///
/// Checks run in order: method, bypass patterns, WebSocket scheme, any other
/// non-HTTP scheme.
#[derive(Debug, Clone)]
pub struct RequestFilter {
    bypass: Vec<UrlPattern>,
}

impl RequestFilter {
    /// Create a filter that bypasses URLs containing `api_marker`.
    pub fn new(api_marker: &str) -> Self {
        Self {
            bypass: vec![UrlPattern::contains(api_marker)],
        }
    }

    /// Bypass URLs matching an additional pattern.
    pub fn bypass(&mut self, pattern: UrlPattern) {
        self.bypass.push(pattern);
    }

    /// Classify a request.
    pub fn classify(&self, request: &Request) -> InterceptAction {
        let action = self.classify_inner(request);
        trace!(url = %request.url, action = ?action, "Classified request");
        action
    }

    fn classify_inner(&self, request: &Request) -> InterceptAction {
        if request.method != Method::GET {
            return InterceptAction::Bypass(BypassReason::NonReadMethod);
        }

        if let Some(pattern) = self.bypass.iter().find(|p| p.matches(&request.url)) {
            return InterceptAction::Bypass(BypassReason::Pattern(pattern.pattern.clone()));
        }

        match request.url.scheme() {
            "http" | "https" => InterceptAction::Handle,
            "ws" | "wss" => InterceptAction::Bypass(BypassReason::WebSocket),
            other => InterceptAction::Bypass(BypassReason::UnsupportedScheme(other.to_string())),
        }
    }
}

impl Default for RequestFilter {
    fn default() -> Self {
        Self::new("/api/")
    }
}
