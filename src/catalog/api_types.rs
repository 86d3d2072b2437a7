//! Serde-deserializable types matching backend responses.
//!
//! These types are separate from storage records and domain types so the
//! wire shape can change without touching the cache.

use serde::Deserialize;

use super::types::IgistMode;

fn default_api_version() -> u32 {
  1
}

// ============================================================================
// Books
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBook {
  pub id: u64,
  pub title: String,
  pub author: Option<String>,
  #[serde(default = "default_api_version")]
  pub api_version: u32,
  pub cover_url: Option<String>,
  #[serde(default)]
  pub chapter_count: u32,
}

// ============================================================================
// Chapters
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiChapterSummary {
  pub number: u32,
  #[serde(default)]
  pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiChapter {
  pub number: u32,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub body: String,
}

// ============================================================================
// Api info
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiInfo {
  pub igist_mode: IgistMode,
  pub survey_link: Option<String>,
}

// ============================================================================
// Storefront
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiStoreSection {
  pub title: String,
  #[serde(default)]
  pub books: Vec<ApiBook>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiStorefront {
  #[serde(default)]
  pub sections: Vec<ApiStoreSection>,
}
