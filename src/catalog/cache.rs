//! Storage records for catalog entities and their translations.
//!
//! Remote payloads are normalized into records on the way into the store;
//! domain values are built from records on the way out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{hash_query, Cacheable, QueryKey};

use super::api_types::{ApiBook, ApiChapter, ApiChapterSummary, ApiInfo};
use super::types::{
  Api, ApiKey, BetaKeyGrant, Book, Chapter, ChapterKey, ChapterSummary, IgistMode,
};

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
  pub id: u64,
  pub title: String,
  pub author: Option<String>,
  pub api_version: u32,
  pub cover_url: Option<String>,
  pub chapter_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterSummaryRecord {
  pub book_id: u64,
  pub number: u32,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
  pub book_id: u64,
  pub number: u32,
  pub title: String,
  pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRecord {
  pub book_id: u64,
  pub api_version: u32,
  pub mode: IgistMode,
  pub survey_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaKeyRecord {
  pub book_id: u64,
  pub api_version: u32,
  pub key: String,
  pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSectionRecord {
  pub title: String,
  pub book_ids: Vec<u64>,
}

/// The storefront document; featured books are stored as `BookRecord`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorefrontRecord {
  pub sections: Vec<StoreSectionRecord>,
}

pub(crate) fn chapter_key(book_id: u64, number: u32) -> String {
  format!("{}:{}", book_id, number)
}

pub(crate) fn api_key(book_id: u64, api_version: u32) -> String {
  format!("{}:{}", book_id, api_version)
}

pub(crate) fn beta_key(book_id: u64, api_version: u32, key: &str) -> String {
  format!("{}:{}:{}", book_id, api_version, key)
}

pub(crate) const STOREFRONT_KEY: &str = "storefront";

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for BookRecord {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> &'static str {
    "book"
  }
}

impl Cacheable for ChapterSummaryRecord {
  fn cache_key(&self) -> String {
    chapter_key(self.book_id, self.number)
  }

  fn entity_type() -> &'static str {
    "chapter_summary"
  }
}

impl Cacheable for ChapterRecord {
  fn cache_key(&self) -> String {
    chapter_key(self.book_id, self.number)
  }

  fn entity_type() -> &'static str {
    "chapter"
  }
}

impl Cacheable for ApiRecord {
  fn cache_key(&self) -> String {
    api_key(self.book_id, self.api_version)
  }

  fn entity_type() -> &'static str {
    "api"
  }
}

impl Cacheable for BetaKeyRecord {
  fn cache_key(&self) -> String {
    beta_key(self.book_id, self.api_version, &self.key)
  }

  fn entity_type() -> &'static str {
    "beta_key"
  }
}

impl Cacheable for StorefrontRecord {
  fn cache_key(&self) -> String {
    STOREFRONT_KEY.to_string()
  }

  fn entity_type() -> &'static str {
    "storefront"
  }
}

// ============================================================================
// Collection keys
// ============================================================================

/// Collections kept by the catalog.
#[derive(Clone, Debug)]
pub enum CatalogQueryKey {
  /// Every book in the catalog
  AllBooks,
  /// Table of contents of one book
  Chapters { book_id: u64 },
}

impl QueryKey for CatalogQueryKey {
  fn cache_hash(&self) -> String {
    let input = match self {
      Self::AllBooks => "books:all".to_string(),
      Self::Chapters { book_id } => format!("chapters:{}", book_id),
    };
    hash_query(&input)
  }

  fn description(&self) -> String {
    match self {
      Self::AllBooks => "all books".to_string(),
      Self::Chapters { book_id } => format!("chapters of book {}", book_id),
    }
  }
}

// ============================================================================
// Translations
// ============================================================================

/// Collapse runs of whitespace; blank strings become `None`.
fn clean(value: Option<String>) -> Option<String> {
  value
    .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
    .filter(|v| !v.is_empty())
}

impl From<ApiBook> for BookRecord {
  fn from(book: ApiBook) -> Self {
    Self {
      id: book.id,
      title: clean(Some(book.title)).unwrap_or_default(),
      author: clean(book.author),
      api_version: book.api_version,
      cover_url: clean(book.cover_url),
      chapter_count: book.chapter_count,
    }
  }
}

impl From<BookRecord> for Book {
  fn from(record: BookRecord) -> Self {
    Self {
      id: record.id,
      title: record.title,
      author: record.author,
      api_version: record.api_version,
      cover_url: record.cover_url,
      chapter_count: record.chapter_count,
    }
  }
}

impl ChapterSummaryRecord {
  pub fn from_remote(book_id: u64, chapter: ApiChapterSummary) -> Self {
    Self {
      book_id,
      number: chapter.number,
      title: clean(Some(chapter.title)).unwrap_or_default(),
    }
  }
}

impl From<ChapterSummaryRecord> for ChapterSummary {
  fn from(record: ChapterSummaryRecord) -> Self {
    Self {
      book_id: record.book_id,
      number: record.number,
      title: record.title,
    }
  }
}

impl ChapterRecord {
  pub fn from_remote(key: &ChapterKey, chapter: ApiChapter) -> Self {
    Self {
      book_id: key.book_id,
      number: chapter.number,
      title: clean(Some(chapter.title)).unwrap_or_default(),
      body: chapter.body,
    }
  }
}

impl From<ChapterRecord> for Chapter {
  fn from(record: ChapterRecord) -> Self {
    Self {
      book_id: record.book_id,
      number: record.number,
      title: record.title,
      body: record.body,
    }
  }
}

impl ApiRecord {
  pub fn from_remote(key: &ApiKey, info: ApiInfo) -> Self {
    Self {
      book_id: key.book_id,
      api_version: key.api_version,
      mode: info.igist_mode,
      survey_link: clean(info.survey_link),
    }
  }
}

impl From<ApiRecord> for Api {
  fn from(record: ApiRecord) -> Self {
    Self {
      book_id: record.book_id,
      api_version: record.api_version,
      mode: record.mode,
      survey_link: record.survey_link,
    }
  }
}

impl From<BetaKeyRecord> for BetaKeyGrant {
  fn from(record: BetaKeyRecord) -> Self {
    Self {
      book_id: record.book_id,
      api_version: record.api_version,
      key: record.key,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_book_translation_normalizes_text() {
    let record = BookRecord::from(ApiBook {
      id: 7,
      title: "  The   Left Hand ".to_string(),
      author: Some("   ".to_string()),
      api_version: 2,
      cover_url: None,
      chapter_count: 12,
    });

    assert_eq!(record.title, "The Left Hand");
    assert_eq!(record.author, None);
    assert_eq!(Book::from(record).api_version, 2);
  }

  #[test]
  fn test_api_record_takes_identity_from_key() {
    let key = ApiKey {
      book_id: 7,
      api_version: 2,
    };
    let record = ApiRecord::from_remote(
      &key,
      ApiInfo {
        igist_mode: IgistMode::RequireBetaKey,
        survey_link: Some("https://x".to_string()),
      },
    );

    assert_eq!(record.cache_key(), "7:2");
    assert_eq!(
      Api::from(record),
      Api {
        book_id: 7,
        api_version: 2,
        mode: IgistMode::RequireBetaKey,
        survey_link: Some("https://x".to_string()),
      }
    );
  }

  #[test]
  fn test_collection_keys_are_distinct() {
    let all = CatalogQueryKey::AllBooks.cache_hash();
    let one = CatalogQueryKey::Chapters { book_id: 1 }.cache_hash();
    let two = CatalogQueryKey::Chapters { book_id: 2 }.cache_hash();
    assert_ne!(all, one);
    assert_ne!(one, two);
  }
}
