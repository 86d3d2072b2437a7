use color_eyre::Result;
use std::fmt;

/// A GET against the backend, relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub path: String,
}

impl Request {
  pub fn get(path: impl Into<String>) -> Self {
    Self { path: path.into() }
  }
}

impl fmt::Display for Request {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "GET {}", self.path)
  }
}

/// Raw answer from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  pub fn is_successful(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Synchronous request/response access to the backend.
///
/// Called from blocking workers only. An `Err` means the request never got
/// an answer (I/O, connectivity, timeout); any answer, including non-2xx
/// statuses, is an `Ok(Response)`.
pub trait RemoteTransport: Send + Sync {
  fn fetch(&self, request: &Request) -> Result<Response>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_success_range() {
    assert!(Response::new(200, "").is_successful());
    assert!(Response::new(204, "").is_successful());
    assert!(!Response::new(304, "").is_successful());
    assert!(!Response::new(403, "").is_successful());
  }

  #[test]
  fn test_request_display() {
    assert_eq!(Request::get("/books/7").to_string(), "GET /books/7");
  }
}
