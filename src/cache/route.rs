//! Route classification: which strategy serves a request.

use crate::net::Request;

/// How a cacheable request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// Server-authoritative content: network first, cache as fallback
  Dynamic,
  /// Version-pinned assets: cache first, network on miss
  Static,
}

/// Maps requests onto a [`RouteClass`].
#[derive(Debug, Clone)]
pub struct Classifier {
  api_pattern: String,
}

impl Classifier {
  pub fn new(api_pattern: impl Into<String>) -> Self {
    Self {
      api_pattern: api_pattern.into(),
    }
  }

  /// Only GET requests go through the caching strategies.
  pub fn is_cacheable(&self, request: &Request) -> bool {
    request.is_get()
  }

  pub fn classify(&self, request: &Request) -> RouteClass {
    if request.url.path().contains(&self.api_pattern) {
      RouteClass::Dynamic
    } else {
      RouteClass::Static
    }
  }
}
