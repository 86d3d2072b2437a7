//! Entity repositories of the catalog, bundled for hosts.

use color_eyre::Result;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::cache::CacheStorage;
use crate::pipeline::{RemoteTransport, Repository, UpdateStream};

use super::cache::{
  ApiRecord, BetaKeyRecord, BookRecord, ChapterRecord, ChapterSummaryRecord, StorefrontRecord,
};
use super::resolvers::{
  ApiResolver, BetaKeyResolver, BookResolver, BooksResolver, ChapterResolver, ChaptersResolver,
  StorefrontResolver,
};
use super::types::{Api, ApiKey, BetaKeyGrant, BetaKeyRequest};

pub type BooksRepository<S, T> = Repository<BooksResolver, S, T>;
pub type BookRepository<S, T> = Repository<BookResolver, S, T>;
pub type ChaptersRepository<S, T> = Repository<ChaptersResolver, S, T>;
pub type ChapterRepository<S, T> = Repository<ChapterResolver, S, T>;
pub type StorefrontRepository<S, T> = Repository<StorefrontResolver, S, T>;

/// Api info plus its beta-key gate.
///
/// The two flows run in separate slots, so checking a key never cancels an
/// api refresh and vice versa.
pub struct ApiRepository<S, T> {
  info: Repository<ApiResolver, S, T>,
  gate: Repository<BetaKeyResolver, S, T>,
}

impl<S, T> ApiRepository<S, T>
where
  S: CacheStorage + 'static,
  T: RemoteTransport + 'static,
{
  pub fn new(store: Arc<S>, transport: Arc<T>, runtime: Handle) -> Self {
    Self {
      info: Repository::new(ApiResolver, Arc::clone(&store), Arc::clone(&transport), runtime.clone()),
      gate: Repository::new(BetaKeyResolver, store, transport, runtime),
    }
  }

  pub fn load(&self, key: ApiKey, always_fetch: bool) -> UpdateStream<Api, Api> {
    self.info.load(key, always_fetch)
  }

  /// Check `key` against the gate of `api`.
  pub fn check_beta_key(
    &self,
    api: &Api,
    key: Option<String>,
    always_fetch: bool,
  ) -> UpdateStream<Option<BetaKeyGrant>, Option<BetaKeyGrant>> {
    self.gate.load(BetaKeyRequest::new(api, key), always_fetch)
  }

  pub fn info(&self) -> &Repository<ApiResolver, S, T> {
    &self.info
  }

  pub fn gate(&self) -> &Repository<BetaKeyResolver, S, T> {
    &self.gate
  }

  pub fn cancel(&self) {
    self.info.cancel();
    self.gate.cancel();
  }
}

impl<S, T> Clone for ApiRepository<S, T> {
  fn clone(&self) -> Self {
    Self {
      info: self.info.clone(),
      gate: self.gate.clone(),
    }
  }
}

/// Every catalog repository over one store and one transport.
pub struct Catalog<S, T> {
  pub books: BooksRepository<S, T>,
  pub book: BookRepository<S, T>,
  pub chapters: ChaptersRepository<S, T>,
  pub chapter: ChapterRepository<S, T>,
  pub api: ApiRepository<S, T>,
  pub storefront: StorefrontRepository<S, T>,
  store: Arc<S>,
}

impl<S, T> Catalog<S, T>
where
  S: CacheStorage + 'static,
  T: RemoteTransport + 'static,
{
  pub fn new(store: Arc<S>, transport: Arc<T>, runtime: Handle) -> Self {
    Self {
      books: Repository::new(BooksResolver, Arc::clone(&store), Arc::clone(&transport), runtime.clone()),
      book: Repository::new(BookResolver, Arc::clone(&store), Arc::clone(&transport), runtime.clone()),
      chapters: Repository::new(
        ChaptersResolver,
        Arc::clone(&store),
        Arc::clone(&transport),
        runtime.clone(),
      ),
      chapter: Repository::new(
        ChapterResolver,
        Arc::clone(&store),
        Arc::clone(&transport),
        runtime.clone(),
      ),
      api: ApiRepository::new(Arc::clone(&store), Arc::clone(&transport), runtime.clone()),
      storefront: Repository::new(StorefrontResolver, Arc::clone(&store), transport, runtime),
      store,
    }
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  /// Cancel every in-flight load.
  pub fn cancel_all(&self) {
    self.books.cancel();
    self.book.cancel();
    self.chapters.cancel();
    self.chapter.cancel();
    self.api.cancel();
    self.storefront.cancel();
  }

  /// Drop every cached catalog entity, returning how many were removed.
  pub fn clear_cache(&self) -> Result<usize> {
    let store = self.store.as_ref();
    Ok(
      store.delete_all::<BookRecord>()?
        + store.delete_all::<ChapterSummaryRecord>()?
        + store.delete_all::<ChapterRecord>()?
        + store.delete_all::<ApiRecord>()?
        + store.delete_all::<BetaKeyRecord>()?
        + store.delete_all::<StorefrontRecord>()?,
    )
  }
}
