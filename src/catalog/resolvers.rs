//! Per-entity policy for the resolution pipeline.
//!
//! Store policy per entity:
//! - all books: collection replace
//! - chapter list: collection merge (upsert per chapter)
//! - book, chapter, api, beta key, storefront: single-entity upsert

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};

use crate::cache::{CacheStorage, CachedCollection, CachedEntity};
use crate::pipeline::{Precheck, Request, Resolver};

use super::api_types::{ApiBook, ApiChapter, ApiChapterSummary, ApiInfo, ApiStorefront};
use super::cache::{
  api_key, beta_key, chapter_key, ApiRecord, BetaKeyRecord, BookRecord, CatalogQueryKey,
  ChapterRecord, ChapterSummaryRecord, StoreSectionRecord, StorefrontRecord, STOREFRONT_KEY,
};
use super::types::{
  AllBooks, Api, ApiKey, BetaKeyGrant, BetaKeyRequest, Book, BookId, Chapter, ChapterKey,
  ChapterSummary, IgistMode, StoreSection, Storefront, StorefrontKey,
};

fn parse<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T> {
  serde_json::from_slice(body).map_err(|e| eyre!("Failed to parse {}: {}", what, e))
}

/// Reject the first identifier that is zero.
fn require_positive<D>(fields: &[(&str, u64)]) -> Precheck<D> {
  match fields.iter().find(|(_, value)| *value == 0) {
    Some((name, _)) => Precheck::Rejected(format!("{} must be positive", name)),
    None => Precheck::Proceed,
  }
}

// ============================================================================
// Book catalog
// ============================================================================

pub struct BooksResolver;

impl Resolver for BooksResolver {
  type Key = AllBooks;
  type Stored = Vec<BookRecord>;
  type Domain = Vec<Book>;

  const NAME: &'static str = "books";

  fn read<S: CacheStorage>(
    &self,
    store: &S,
    _key: &AllBooks,
  ) -> Result<Option<CachedEntity<Vec<BookRecord>>>> {
    Ok(
      store
        .get_collection::<BookRecord>(&CatalogQueryKey::AllBooks)?
        .map(CachedCollection::into_entity),
    )
  }

  fn write<S: CacheStorage>(&self, store: &S, _key: &AllBooks, stored: &Vec<BookRecord>) -> Result<()> {
    store.replace_collection(&CatalogQueryKey::AllBooks, stored)
  }

  fn request(&self, _key: &AllBooks) -> Request {
    Request::get("/books")
  }

  fn decode(&self, _key: &AllBooks, body: &[u8]) -> Result<Vec<BookRecord>> {
    let books: Vec<ApiBook> = parse(body, "book list")?;
    Ok(books.into_iter().map(BookRecord::from).collect())
  }

  fn to_domain(&self, stored: Vec<BookRecord>) -> Vec<Book> {
    stored.into_iter().map(Book::from).collect()
  }
}

// ============================================================================
// Single book
// ============================================================================

pub struct BookResolver;

impl Resolver for BookResolver {
  type Key = BookId;
  type Stored = BookRecord;
  type Domain = Book;

  const NAME: &'static str = "book";

  fn precheck(&self, key: &BookId) -> Precheck<Book> {
    require_positive(&[("book id", key.0)])
  }

  fn read<S: CacheStorage>(&self, store: &S, key: &BookId) -> Result<Option<CachedEntity<BookRecord>>> {
    store.get_entity(&key.0.to_string())
  }

  fn write<S: CacheStorage>(&self, store: &S, _key: &BookId, stored: &BookRecord) -> Result<()> {
    store.store_entity(stored)
  }

  fn request(&self, key: &BookId) -> Request {
    Request::get(format!("/books/{}", key.0))
  }

  fn decode(&self, key: &BookId, body: &[u8]) -> Result<BookRecord> {
    let book: ApiBook = parse(body, "book")?;
    if book.id != key.0 {
      return Err(eyre!("Server returned book {} for book {}", book.id, key.0));
    }
    Ok(book.into())
  }

  fn to_domain(&self, stored: BookRecord) -> Book {
    stored.into()
  }
}

// ============================================================================
// Chapters
// ============================================================================

pub struct ChaptersResolver;

impl Resolver for ChaptersResolver {
  type Key = BookId;
  type Stored = Vec<ChapterSummaryRecord>;
  type Domain = Vec<ChapterSummary>;

  const NAME: &'static str = "chapters";

  fn precheck(&self, key: &BookId) -> Precheck<Vec<ChapterSummary>> {
    require_positive(&[("book id", key.0)])
  }

  fn read<S: CacheStorage>(
    &self,
    store: &S,
    key: &BookId,
  ) -> Result<Option<CachedEntity<Vec<ChapterSummaryRecord>>>> {
    Ok(
      store
        .get_collection::<ChapterSummaryRecord>(&CatalogQueryKey::Chapters { book_id: key.0 })?
        .map(CachedCollection::into_entity),
    )
  }

  fn write<S: CacheStorage>(
    &self,
    store: &S,
    key: &BookId,
    stored: &Vec<ChapterSummaryRecord>,
  ) -> Result<()> {
    store.merge_collection(&CatalogQueryKey::Chapters { book_id: key.0 }, stored)
  }

  fn request(&self, key: &BookId) -> Request {
    Request::get(format!("/books/{}/chapters", key.0))
  }

  fn decode(&self, key: &BookId, body: &[u8]) -> Result<Vec<ChapterSummaryRecord>> {
    let chapters: Vec<ApiChapterSummary> = parse(body, "chapter list")?;
    Ok(
      chapters
        .into_iter()
        .map(|c| ChapterSummaryRecord::from_remote(key.0, c))
        .collect(),
    )
  }

  fn to_domain(&self, stored: Vec<ChapterSummaryRecord>) -> Vec<ChapterSummary> {
    let mut chapters: Vec<ChapterSummary> = stored.into_iter().map(ChapterSummary::from).collect();
    chapters.sort_by_key(|c| c.number);
    chapters
  }
}

pub struct ChapterResolver;

impl Resolver for ChapterResolver {
  type Key = ChapterKey;
  type Stored = ChapterRecord;
  type Domain = Chapter;

  const NAME: &'static str = "chapter";

  fn precheck(&self, key: &ChapterKey) -> Precheck<Chapter> {
    require_positive(&[
      ("book id", key.book_id),
      ("chapter number", u64::from(key.number)),
    ])
  }

  fn read<S: CacheStorage>(
    &self,
    store: &S,
    key: &ChapterKey,
  ) -> Result<Option<CachedEntity<ChapterRecord>>> {
    store.get_entity(&chapter_key(key.book_id, key.number))
  }

  fn write<S: CacheStorage>(&self, store: &S, _key: &ChapterKey, stored: &ChapterRecord) -> Result<()> {
    store.store_entity(stored)
  }

  fn request(&self, key: &ChapterKey) -> Request {
    Request::get(format!("/books/{}/chapters/{}", key.book_id, key.number))
  }

  fn decode(&self, key: &ChapterKey, body: &[u8]) -> Result<ChapterRecord> {
    let chapter: ApiChapter = parse(body, "chapter")?;
    if chapter.number != key.number {
      return Err(eyre!(
        "Server returned chapter {} for chapter {}",
        chapter.number,
        key.number
      ));
    }
    Ok(ChapterRecord::from_remote(key, chapter))
  }

  fn to_domain(&self, stored: ChapterRecord) -> Chapter {
    stored.into()
  }
}

// ============================================================================
// Api info
// ============================================================================

pub struct ApiResolver;

impl Resolver for ApiResolver {
  type Key = ApiKey;
  type Stored = ApiRecord;
  type Domain = Api;

  const NAME: &'static str = "api";

  fn precheck(&self, key: &ApiKey) -> Precheck<Api> {
    require_positive(&[
      ("book id", key.book_id),
      ("api version", u64::from(key.api_version)),
    ])
  }

  fn read<S: CacheStorage>(&self, store: &S, key: &ApiKey) -> Result<Option<CachedEntity<ApiRecord>>> {
    store.get_entity(&api_key(key.book_id, key.api_version))
  }

  fn write<S: CacheStorage>(&self, store: &S, _key: &ApiKey, stored: &ApiRecord) -> Result<()> {
    store.store_entity(stored)
  }

  fn request(&self, key: &ApiKey) -> Request {
    Request::get(format!("/books/{}/api/{}", key.book_id, key.api_version))
  }

  fn decode(&self, key: &ApiKey, body: &[u8]) -> Result<ApiRecord> {
    let info: ApiInfo = parse(body, "api info")?;
    Ok(ApiRecord::from_remote(key, info))
  }

  fn to_domain(&self, stored: ApiRecord) -> Api {
    stored.into()
  }
}

// ============================================================================
// Beta key gate
// ============================================================================

/// Checks a beta key against the server when the api requires one.
///
/// Resolves to `None` when no key is needed and `Some(grant)` once the
/// server accepted the key.
pub struct BetaKeyResolver;

fn is_key_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

impl Resolver for BetaKeyResolver {
  type Key = BetaKeyRequest;
  type Stored = BetaKeyRecord;
  type Domain = Option<BetaKeyGrant>;

  const NAME: &'static str = "beta_key";

  fn precheck(&self, key: &BetaKeyRequest) -> Precheck<Option<BetaKeyGrant>> {
    match key.mode {
      IgistMode::None => Precheck::Resolved(None),
      IgistMode::RequireBetaKey => match key.supplied_key() {
        None => Precheck::Rejected("a beta key is required for this book".to_string()),
        Some(k) if !k.chars().all(is_key_char) => {
          Precheck::Rejected("beta key contains unsupported characters".to_string())
        }
        Some(_) => Precheck::Proceed,
      },
    }
  }

  fn read<S: CacheStorage>(
    &self,
    store: &S,
    key: &BetaKeyRequest,
  ) -> Result<Option<CachedEntity<BetaKeyRecord>>> {
    match key.supplied_key() {
      Some(k) => store.get_entity(&beta_key(key.book_id, key.api_version, k)),
      None => Ok(None),
    }
  }

  fn write<S: CacheStorage>(&self, store: &S, _key: &BetaKeyRequest, stored: &BetaKeyRecord) -> Result<()> {
    store.store_entity(stored)
  }

  fn request(&self, key: &BetaKeyRequest) -> Request {
    Request::get(format!(
      "/books/{}/api/{}/beta-keys/{}",
      key.book_id,
      key.api_version,
      key.supplied_key().unwrap_or_default()
    ))
  }

  fn decode(&self, key: &BetaKeyRequest, _body: &[u8]) -> Result<BetaKeyRecord> {
    let supplied = key
      .supplied_key()
      .ok_or_else(|| eyre!("No beta key to record"))?;
    Ok(BetaKeyRecord {
      book_id: key.book_id,
      api_version: key.api_version,
      key: supplied.to_string(),
      accepted_at: chrono::Utc::now(),
    })
  }

  fn to_domain(&self, stored: BetaKeyRecord) -> Option<BetaKeyGrant> {
    Some(stored.into())
  }
}

// ============================================================================
// Storefront
// ============================================================================

/// Storefront document together with the book records it references.
#[derive(Debug, Clone, PartialEq)]
pub struct StorefrontSnapshot {
  pub record: StorefrontRecord,
  pub books: Vec<BookRecord>,
}

pub struct StorefrontResolver;

impl Resolver for StorefrontResolver {
  type Key = StorefrontKey;
  type Stored = StorefrontSnapshot;
  type Domain = Storefront;

  const NAME: &'static str = "storefront";

  fn read<S: CacheStorage>(
    &self,
    store: &S,
    _key: &StorefrontKey,
  ) -> Result<Option<CachedEntity<StorefrontSnapshot>>> {
    let cached = match store.get_entity::<StorefrontRecord>(STOREFRONT_KEY)? {
      Some(cached) => cached,
      None => return Ok(None),
    };

    let mut seen = HashSet::new();
    let mut books = Vec::new();
    for id in cached.entity.sections.iter().flat_map(|s| s.book_ids.iter()) {
      if seen.insert(*id) {
        if let Some(book) = store.get_entity::<BookRecord>(&id.to_string())? {
          books.push(book.entity);
        }
      }
    }

    Ok(Some(CachedEntity {
      entity: StorefrontSnapshot {
        record: cached.entity,
        books,
      },
      cached_at: cached.cached_at,
    }))
  }

  fn write<S: CacheStorage>(
    &self,
    store: &S,
    _key: &StorefrontKey,
    stored: &StorefrontSnapshot,
  ) -> Result<()> {
    store.store_entity_with(&stored.record, &stored.books)
  }

  fn request(&self, _key: &StorefrontKey) -> Request {
    Request::get("/storefront")
  }

  fn decode(&self, _key: &StorefrontKey, body: &[u8]) -> Result<StorefrontSnapshot> {
    let storefront: ApiStorefront = parse(body, "storefront")?;

    let mut seen = HashSet::new();
    let mut books = Vec::new();
    let mut sections = Vec::new();
    for section in storefront.sections {
      let mut book_ids = Vec::with_capacity(section.books.len());
      for book in section.books {
        book_ids.push(book.id);
        if seen.insert(book.id) {
          books.push(BookRecord::from(book));
        }
      }
      sections.push(StoreSectionRecord {
        title: section.title,
        book_ids,
      });
    }

    Ok(StorefrontSnapshot {
      record: StorefrontRecord { sections },
      books,
    })
  }

  fn to_domain(&self, stored: StorefrontSnapshot) -> Storefront {
    let books: HashMap<u64, Book> = stored
      .books
      .into_iter()
      .map(|b| (b.id, Book::from(b)))
      .collect();

    Storefront {
      sections: stored
        .record
        .sections
        .into_iter()
        .map(|section| StoreSection {
          title: section.title,
          books: section
            .book_ids
            .iter()
            .filter_map(|id| books.get(id).cloned())
            .collect(),
        })
        .collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::pipeline::{Repository, ResolveError, Update};
  use crate::testing::{ReadOnlyStorage, ScriptedTransport};
  use serde_json::json;
  use std::sync::Arc;
  use tokio::runtime::Handle;

  fn repository<R: Resolver>(
    resolver: R,
    store: &Arc<MemoryStorage>,
    transport: &Arc<ScriptedTransport>,
  ) -> Repository<R, MemoryStorage, ScriptedTransport> {
    Repository::new(resolver, Arc::clone(store), Arc::clone(transport), Handle::current())
  }

  fn api(mode: IgistMode) -> Api {
    Api {
      book_id: 7,
      api_version: 2,
      mode,
      survey_link: None,
    }
  }

  #[tokio::test]
  async fn test_api_info_resolves_from_server() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    transport.respond_json(
      "/books/7/api/2",
      json!({"igistMode": "REQUIRE_BETA_KEY", "surveyLink": "https://example.com/survey"}),
    );
    let repo = repository(ApiResolver, &store, &transport);

    let key = ApiKey {
      book_id: 7,
      api_version: 2,
    };
    let terminal = repo.load(key, true).terminal().await.unwrap();

    assert_eq!(
      terminal.value(),
      Some(&Api {
        book_id: 7,
        api_version: 2,
        mode: IgistMode::RequireBetaKey,
        survey_link: Some("https://example.com/survey".to_string()),
      })
    );
    assert!(store.get_entity::<ApiRecord>("7:2").unwrap().is_some());
    assert_eq!(transport.requests(), vec![Request::get("/books/7/api/2")]);
  }

  #[tokio::test]
  async fn test_api_io_failure_keeps_cached_value() {
    let store = Arc::new(MemoryStorage::new());
    store
      .store_entity(&ApiRecord {
        book_id: 7,
        api_version: 2,
        mode: IgistMode::None,
        survey_link: None,
      })
      .unwrap();
    let transport = ScriptedTransport::new();
    transport.fail("/books/7/api/2", "connection refused");
    let repo = repository(ApiResolver, &store, &transport);

    let key = ApiKey {
      book_id: 7,
      api_version: 2,
    };
    let terminal = repo.load(key, true).terminal().await.unwrap();

    match terminal {
      Update::Failure { partial, error, .. } => {
        assert_eq!(partial, Some(api(IgistMode::None)));
        assert!(matches!(error, ResolveError::Transport(_)));
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_api_zero_version_is_rejected() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    let repo = repository(ApiResolver, &store, &transport);

    let key = ApiKey {
      book_id: 7,
      api_version: 0,
    };
    let terminal = repo.load(key, true).terminal().await.unwrap();

    assert_eq!(
      terminal.error(),
      Some(&ResolveError::Validation("api version must be positive".to_string()))
    );
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_gate_open_api_needs_no_key() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    let repo = repository(BetaKeyResolver, &store, &transport);

    let request = BetaKeyRequest::new(&api(IgistMode::None), None);
    let updates = repo.load(request, true).collect_all().await;

    assert_eq!(updates.len(), 2);
    assert!(updates[1].is_success());
    assert_eq!(updates[1].value(), Some(&None));
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_gate_blank_key_is_rejected() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    let repo = repository(BetaKeyResolver, &store, &transport);

    for key in [None, Some(String::new()), Some("   ".to_string())] {
      let request = BetaKeyRequest::new(&api(IgistMode::RequireBetaKey), key);
      let terminal = repo.load(request, true).terminal().await.unwrap();
      assert!(matches!(terminal.error(), Some(ResolveError::Validation(_))));
    }
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_gate_rejects_unsafe_key() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    let repo = repository(BetaKeyResolver, &store, &transport);

    let request = BetaKeyRequest::new(&api(IgistMode::RequireBetaKey), Some("../admin".to_string()));
    let terminal = repo.load(request, true).terminal().await.unwrap();

    assert!(matches!(terminal.error(), Some(ResolveError::Validation(_))));
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_gate_accepted_key_is_recorded() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    transport.respond("/books/7/api/2/beta-keys/early-bird", 204, "");
    let repo = repository(BetaKeyResolver, &store, &transport);

    let request = BetaKeyRequest::new(&api(IgistMode::RequireBetaKey), Some(" early-bird ".to_string()));
    let terminal = repo.load(request.clone(), true).terminal().await.unwrap();

    assert_eq!(
      terminal.value(),
      Some(&Some(BetaKeyGrant {
        book_id: 7,
        api_version: 2,
        key: "early-bird".to_string(),
      }))
    );

    // A second check with the cache allowed is answered locally.
    let cached = repo.load(request, false).terminal().await.unwrap();
    assert!(cached.is_success());
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_gate_refused_key_is_a_status_failure() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    transport.respond("/books/7/api/2/beta-keys/wrong", 403, "");
    let repo = repository(BetaKeyResolver, &store, &transport);

    let request = BetaKeyRequest::new(&api(IgistMode::RequireBetaKey), Some("wrong".to_string()));
    let terminal = repo.load(request, true).terminal().await.unwrap();

    assert_eq!(terminal.error(), Some(&ResolveError::Status { code: 403 }));
    assert!(terminal.error().is_some_and(|e| e.is_rejection(403)));
  }

  #[tokio::test]
  async fn test_books_replace_collection() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    transport.respond_json(
      "/books",
      json!([{"id": 1, "title": "One"}, {"id": 2, "title": "Two"}]),
    );
    transport.respond_json("/books", json!([{"id": 2, "title": "Two"}]));
    let repo = repository(BooksResolver, &store, &transport);

    let first = repo.load(AllBooks, true).terminal().await.unwrap();
    assert_eq!(first.value().map(Vec::len), Some(2));

    let second = repo.load(AllBooks, true).terminal().await.unwrap();
    let ids: Vec<u64> = second.value().unwrap().iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![2]);
  }

  #[tokio::test]
  async fn test_chapters_merge_and_sort() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    transport.respond_json(
      "/books/3/chapters",
      json!([{"number": 2, "title": "Two"}, {"number": 1, "title": "One"}]),
    );
    transport.respond_json(
      "/books/3/chapters",
      json!([{"number": 3, "title": "Three"}, {"number": 1, "title": "One, revised"}]),
    );
    let repo = repository(ChaptersResolver, &store, &transport);

    repo.load(BookId(3), true).terminal().await.unwrap();
    let terminal = repo.load(BookId(3), true).terminal().await.unwrap();

    let chapters = terminal.value().unwrap();
    let titles: Vec<&str> = chapters.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["One, revised", "Two", "Three"]);
  }

  #[tokio::test]
  async fn test_book_mismatched_id_is_a_transport_failure() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    transport.respond_json("/books/5", json!({"id": 6, "title": "Other"}));
    let repo = repository(BookResolver, &store, &transport);

    let terminal = repo.load(BookId(5), true).terminal().await.unwrap();

    assert!(matches!(terminal.error(), Some(ResolveError::Transport(_))));
    assert!(store.get_entity::<BookRecord>("6").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_chapter_round_trips_through_store() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    transport.respond_json(
      "/books/3/chapters/1",
      json!({"number": 1, "title": " Opening ", "body": "It begins."}),
    );
    let repo = repository(ChapterResolver, &store, &transport);
    let key = ChapterKey {
      book_id: 3,
      number: 1,
    };

    let fetched = repo.load(key, true).terminal().await.unwrap();
    let cached = repo.load(key, false).terminal().await.unwrap();

    assert_eq!(fetched.value(), cached.value());
    assert_eq!(cached.value().unwrap().title, "Opening");
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_storefront_joins_books_from_store() {
    let store = Arc::new(MemoryStorage::new());
    let transport = ScriptedTransport::new();
    transport.respond_json(
      "/storefront",
      json!({"sections": [
        {"title": "New", "books": [{"id": 1, "title": "One"}, {"id": 2, "title": "Two"}]},
        {"title": "Popular", "books": [{"id": 2, "title": "Two"}]}
      ]}),
    );
    let repo = repository(StorefrontResolver, &store, &transport);

    repo.load(StorefrontKey, true).terminal().await.unwrap();
    let cached = repo.load(StorefrontKey, false).terminal().await.unwrap();

    let storefront = cached.value().unwrap();
    assert_eq!(storefront.sections.len(), 2);
    assert_eq!(storefront.sections[0].books.len(), 2);
    assert_eq!(storefront.sections[1].books[0].title, "Two");
    assert!(store.get_entity::<BookRecord>("1").unwrap().is_some());
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_storefront_write_failure_stores_no_books() {
    let store = Arc::new(ReadOnlyStorage::default());
    let transport = ScriptedTransport::new();
    transport.respond_json(
      "/storefront",
      json!({"sections": [{"title": "New", "books": [{"id": 1, "title": "One"}]}]}),
    );
    let repo = Repository::new(StorefrontResolver, Arc::clone(&store), Arc::clone(&transport), Handle::current());

    let terminal = repo.load(StorefrontKey, true).terminal().await.unwrap();

    assert!(matches!(terminal.error(), Some(ResolveError::Storage(_))));
    assert!(terminal.value().is_none());
    assert!(store.get_entity::<BookRecord>("1").unwrap().is_none());
    assert_eq!(transport.calls(), 1);
  }
}
