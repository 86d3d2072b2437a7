use serde::{Deserialize, Serialize};
use std::fmt;

/// Book summary as shown in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Book {
  pub id: u64,
  pub title: String,
  pub author: Option<String>,
  /// Version of the book's interactive api; needed to load `Api`
  pub api_version: u32,
  pub cover_url: Option<String>,
  pub chapter_count: u32,
}

/// Entry in a book's table of contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterSummary {
  pub book_id: u64,
  pub number: u32,
  pub title: String,
}

/// Full chapter content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
  pub book_id: u64,
  pub number: u32,
  pub title: String,
  pub body: String,
}

/// Access mode of a book's api
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IgistMode {
  /// Open to everyone
  None,
  /// A beta key must be presented before the api can be used
  RequireBetaKey,
}

impl fmt::Display for IgistMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      IgistMode::None => write!(f, "NONE"),
      IgistMode::RequireBetaKey => write!(f, "REQUIRE_BETA_KEY"),
    }
  }
}

/// Api configuration for one version of a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Api {
  pub book_id: u64,
  pub api_version: u32,
  pub mode: IgistMode,
  pub survey_link: Option<String>,
}

/// A beta key the server accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BetaKeyGrant {
  pub book_id: u64,
  pub api_version: u32,
  pub key: String,
}

/// Storefront section with the books it features
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSection {
  pub title: String,
  pub books: Vec<Book>,
}

/// Storefront content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Storefront {
  pub sections: Vec<StoreSection>,
}

// ============================================================================
// Resolution keys
// ============================================================================

/// The whole book catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllBooks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BookId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChapterKey {
  pub book_id: u64,
  pub number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiKey {
  pub book_id: u64,
  pub api_version: u32,
}

impl ApiKey {
  /// The api a book points at.
  pub fn for_book(book: &Book) -> Self {
    Self {
      book_id: book.id,
      api_version: book.api_version,
    }
  }

  pub fn for_api(api: &Api) -> Self {
    Self {
      book_id: api.book_id,
      api_version: api.api_version,
    }
  }
}

/// A beta key check against a resolved api
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetaKeyRequest {
  pub book_id: u64,
  pub api_version: u32,
  pub mode: IgistMode,
  pub key: Option<String>,
}

impl BetaKeyRequest {
  pub fn new(api: &Api, key: Option<String>) -> Self {
    Self {
      book_id: api.book_id,
      api_version: api.api_version,
      mode: api.mode,
      key,
    }
  }

  /// The supplied key, trimmed, if it is not blank.
  pub fn supplied_key(&self) -> Option<&str> {
    self
      .key
      .as_deref()
      .map(str::trim)
      .filter(|k| !k.is_empty())
  }
}

/// The storefront document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorefrontKey;
