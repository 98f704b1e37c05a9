//! Request classification: which strategy, if any, handles a request.
//!
//! Classification is total — every intercepted request maps to exactly one
//! [`RouteClass`], with `Bypass` as the explicit "the engine stays out of the
//! way" bucket instead of an implicit first-matching-handler fallthrough.

use url::Url;

use crate::config::RouteConfig;
use crate::fetch::FetchRequest;

/// The bucket a request falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// Same-origin GET matching the asset suffix allow-list; cache-first.
  StaticAsset,
  /// Same-origin request under an API path prefix; network-first, and the
  /// only class whose mutations are captured for replay.
  ApiCall,
  /// Any other same-origin GET (page navigation included); network-first
  /// with the offline page as last resort.
  NavigationOrOther,
  /// Not ours: cross-origin, unparsable, or a non-GET outside the API paths.
  /// Goes straight to network with no caching or queuing.
  Bypass,
}

impl RouteClass {
  /// Whether cache slots for this class ignore the query string.
  ///
  /// Static assets commonly carry cache-busting params that must all land in
  /// the same slot; API and navigation URLs are query-sensitive.
  pub fn query_sensitive(&self) -> bool {
    !matches!(self, RouteClass::StaticAsset)
  }
}

/// Classifies intercepted requests. No side effects beyond dispatch.
pub struct PolicyRouter {
  origin: Url,
  static_suffixes: Vec<String>,
  api_prefixes: Vec<String>,
}

impl PolicyRouter {
  pub fn new(origin: Url, routes: &RouteConfig) -> Self {
    Self {
      origin,
      static_suffixes: routes.static_suffixes.clone(),
      api_prefixes: routes.api_prefixes.clone(),
    }
  }

  pub fn classify(&self, request: &FetchRequest) -> RouteClass {
    let url = match Url::parse(&request.url) {
      Ok(url) => url,
      Err(_) => return RouteClass::Bypass,
    };

    if url.origin() != self.origin.origin() {
      return RouteClass::Bypass;
    }

    let path = url.path();
    let is_api = self.api_prefixes.iter().any(|p| path.starts_with(p.as_str()));

    if !request.is_read() {
      // Mutations are only intercepted on API paths, where the capture hook
      // at the strategy layer can queue them. Everything else passes through.
      return if is_api { RouteClass::ApiCall } else { RouteClass::Bypass };
    }

    if self.static_suffixes.iter().any(|s| path.ends_with(s.as_str())) {
      RouteClass::StaticAsset
    } else if is_api {
      RouteClass::ApiCall
    } else {
      RouteClass::NavigationOrOther
    }
  }
}
