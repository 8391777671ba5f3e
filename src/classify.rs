//! Routing decision for intercepted requests.

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::error::{Result, ShellCacheError};
use crate::net::Request;

/// URLs that must always go to the network (APIs, realtime channels, hot reload)
pub const DEFAULT_NETWORK_ONLY: &[&str] = &[r"/api/", r"/socket\.io/", r"/ws/", r"\.hot-update\."];

/// Static assets served cache-first
pub const DEFAULT_CACHEABLE: &[&str] = &[
  r"/static/",
  r"/assets/",
  r"/_app/",
  r"\.(?:js|css|png|jpg|jpeg|svg|gif|webp|woff|woff2|ttf|eot)$",
];

pub const DEFAULT_STATIC_MARKER: &str = "/static/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
  /// Not intercepted; the platform handles the request natively
  Passthrough,
  NetworkOnly,
  Cacheable,
  /// Navigations, HTML and everything else: network-first
  Default,
}

/// Two ordered matcher lists. Network-only takes precedence.
#[derive(Debug, Clone)]
pub struct PatternRuleSet {
  network_only: Vec<Regex>,
  cacheable: Vec<Regex>,
}

impl PatternRuleSet {
  pub fn new<S: AsRef<str>>(network_only: &[S], cacheable: &[S]) -> Result<Self> {
    Ok(Self {
      network_only: compile(network_only)?,
      cacheable: compile(cacheable)?,
    })
  }

  fn matches_network_only(&self, url: &str) -> bool {
    self.network_only.iter().any(|re| re.is_match(url))
  }

  fn matches_cacheable(&self, url: &str) -> bool {
    self.cacheable.iter().any(|re| re.is_match(url))
  }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>> {
  patterns
    .iter()
    .map(|p| {
      Regex::new(p.as_ref())
        .map_err(|e| ShellCacheError::Config(format!("invalid pattern '{}': {}", p.as_ref(), e)))
    })
    .collect()
}

/// Pure request classifier bound to the application's origin.
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Url,
  static_marker: String,
  rules: PatternRuleSet,
}

impl Classifier {
  pub fn new(origin: Url, static_marker: impl Into<String>, rules: PatternRuleSet) -> Self {
    Self {
      origin,
      static_marker: static_marker.into(),
      rules,
    }
  }

  pub fn classify(&self, request: &Request) -> Classification {
    let url = request.url.as_str();

    if request.url.origin() != self.origin.origin() && !url.contains(&self.static_marker) {
      return Classification::Passthrough;
    }

    if self.rules.matches_network_only(url) {
      return Classification::NetworkOnly;
    }

    if self.rules.matches_cacheable(url) {
      return Classification::Cacheable;
    }

    if request.is_navigation() || request.accepts_html() {
      debug!(url, "navigational request");
    }

    Classification::Default
  }
}
