use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;
use url::Url;

use crate::config::{Config, ServerConfig};
use crate::pipeline::{RemoteTransport, Request, Response};

/// HTTP access to the content server.
///
/// `fetch` is synchronous: it drives the async client on `runtime` and must
/// only be called from a blocking worker.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base: Url,
  runtime: Handle,
}

impl HttpTransport {
  pub fn new(server: &ServerConfig, runtime: Handle) -> Result<Self> {
    Self::with_token(server, Config::get_api_token(), runtime)
  }

  pub fn with_token(server: &ServerConfig, token: Option<String>, runtime: Handle) -> Result<Self> {
    let base = Self::parse_base(&server.url)?;

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(token) = token {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid API token: {}", e))?;
      headers.insert(AUTHORIZATION, value);
    }

    let user_agent = server
      .user_agent
      .clone()
      .unwrap_or_else(|| format!("folio/{}", env!("CARGO_PKG_VERSION")));

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(server.timeout_secs))
      .user_agent(user_agent)
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      runtime,
    })
  }

  /// Parse the server URL so that request paths are joined below it.
  fn parse_base(url: &str) -> Result<Url> {
    let mut base = Url::parse(url).map_err(|e| eyre!("Invalid server URL {}: {}", url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Invalid server URL {}: not a base URL", url));
    }
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    Ok(base)
  }

  fn url_for(&self, request: &Request) -> Result<Url> {
    self
      .base
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid request path {}: {}", request.path, e))
  }

  async fn send(&self, request: &Request) -> Result<Response> {
    let url = self.url_for(request)?;
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to send {}: {}", request, e))?;
    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response to {}: {}", request, e))?;

    debug!(%request, status, bytes = body.len(), "Response received");
    Ok(Response::new(status, body.to_vec()))
  }
}

impl RemoteTransport for HttpTransport {
  fn fetch(&self, request: &Request) -> Result<Response> {
    self.runtime.block_on(self.send(request))
  }
}
