use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, PRAGMA};

use crate::error::{Result, ShellCacheError};

use super::types::{CacheMode, Method, Request, Response};

/// The network as seen by the agent.
///
/// A returned `Response` may carry any status; only transport-level
/// failures are errors.
#[async_trait]
pub trait Network: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// reqwest-backed network
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("shellcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| ShellCacheError::Network(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { client })
  }

  fn headers_for(request: &Request) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(accept) = request
      .accept
      .as_deref()
      .and_then(|a| HeaderValue::from_str(a).ok())
    {
      headers.insert(ACCEPT, accept);
    }

    if request.cache == CacheMode::Reload {
      headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
      headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    }

    headers
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
    Method::Options => reqwest::Method::OPTIONS,
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let response = self
      .client
      .request(to_reqwest_method(request.method), request.url.clone())
      .headers(Self::headers_for(request))
      .send()
      .await?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect::<Vec<_>>();
    let body = response.bytes().await?.to_vec();

    Ok(
      headers
        .into_iter()
        .fold(Response::new(status, body), |res, (name, value)| {
          res.with_header(name, value)
        }),
    )
  }
}
