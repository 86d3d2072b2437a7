//! Dependent loads: a book first, then the api it points at.
//!
//! A `Session` replaces ambient "current book" / "current api" state with a
//! [`SessionContext`] it owns. `open_book` resolves the book, then resolves
//! the api identified by `(book_id, api_version)` and records both.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::pipeline::{
  Metadata, RemoteTransport, ResolveError, SlotTicket, TaskSlot, Update, UpdateStream,
};

use super::repository::{ApiRepository, BookRepository, Catalog};
use super::types::{Api, ApiKey, BetaKeyGrant, Book, BookId};

/// What the session currently has open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
  pub book: Option<Book>,
  pub api: Option<Api>,
}

/// Progress of an `open_book` flow.
///
/// Sequence: `WaitingOnUpstream`, `UpstreamPending`, any number of
/// `UpstreamProgress`, then either `UpstreamFailed` (terminal) or
/// `UpstreamSucceeded` followed by the downstream states, ending in
/// `DownstreamSucceeded` or `DownstreamFailed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OpenBookState {
  WaitingOnUpstream,
  UpstreamPending,
  UpstreamProgress { count: usize, book: Book },
  UpstreamFailed { error: ResolveError },
  /// `degraded` is set when the book is a cached value the server could not confirm.
  UpstreamSucceeded { book: Book, degraded: bool },
  DownstreamPending,
  DownstreamProgress { count: usize, api: Api },
  DownstreamSucceeded { api: Api },
  DownstreamFailed { partial: Option<Api>, error: ResolveError },
}

impl OpenBookState {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      Self::UpstreamFailed { .. } | Self::DownstreamSucceeded { .. } | Self::DownstreamFailed { .. }
    )
  }

  pub fn label(&self) -> &'static str {
    match self {
      Self::WaitingOnUpstream => "waiting_on_upstream",
      Self::UpstreamPending => "upstream_pending",
      Self::UpstreamProgress { .. } => "upstream_progress",
      Self::UpstreamFailed { .. } => "upstream_failed",
      Self::UpstreamSucceeded { .. } => "upstream_succeeded",
      Self::DownstreamPending => "downstream_pending",
      Self::DownstreamProgress { .. } => "downstream_progress",
      Self::DownstreamSucceeded { .. } => "downstream_succeeded",
      Self::DownstreamFailed { .. } => "downstream_failed",
    }
  }
}

/// Ordered states of one `open_book` flow.
///
/// A superseded or cancelled flow closes without a terminal state.
pub struct OpenBookStream {
  rx: mpsc::UnboundedReceiver<OpenBookState>,
}

impl OpenBookStream {
  pub async fn next(&mut self) -> Option<OpenBookState> {
    self.rx.recv().await
  }

  pub async fn terminal(mut self) -> Option<OpenBookState> {
    let mut last = None;
    while let Some(state) = self.next().await {
      last = Some(state);
    }
    last.filter(OpenBookState::is_terminal)
  }

  pub async fn collect_all(mut self) -> Vec<OpenBookState> {
    let mut states = Vec::new();
    while let Some(state) = self.next().await {
      states.push(state);
    }
    states
  }
}

fn lock(context: &Mutex<SessionContext>) -> MutexGuard<'_, SessionContext> {
  context.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Session<S, T> {
  book: BookRepository<S, T>,
  api: ApiRepository<S, T>,
  slot: Arc<TaskSlot<BookId>>,
  context: Arc<Mutex<SessionContext>>,
  runtime: Handle,
}

impl<S, T> Session<S, T>
where
  S: CacheStorage + 'static,
  T: RemoteTransport + 'static,
{
  pub fn new(catalog: &Catalog<S, T>, runtime: Handle) -> Self {
    Self {
      book: catalog.book.clone(),
      api: catalog.api.clone(),
      slot: TaskSlot::new("session"),
      context: Arc::new(Mutex::new(SessionContext::default())),
      runtime,
    }
  }

  /// Open `book_id`: resolve the book, then its api.
  ///
  /// Starting another `open_book` supersedes this one. The api is resolved
  /// again only when the book's `(book_id, api_version)` differs from what the
  /// session holds, or when `always_fetch` is set.
  pub fn open_book(&self, book_id: u64, always_fetch: bool) -> OpenBookStream {
    let ticket = self.slot.start(BookId(book_id));
    let (tx, rx) = mpsc::unbounded_channel();
    ticket.publish(|| {
      let _ = tx.send(OpenBookState::WaitingOnUpstream);
    });

    let flow = OpenBook {
      book: self.book.clone(),
      api: self.api.clone(),
      context: Arc::clone(&self.context),
      ticket,
      tx,
    };
    self.runtime.spawn(flow.run(book_id, always_fetch));

    OpenBookStream { rx }
  }

  /// Check `key` against the gate of the api the session holds.
  pub fn check_beta_key(
    &self,
    key: Option<String>,
    always_fetch: bool,
  ) -> UpdateStream<Option<BetaKeyGrant>, Option<BetaKeyGrant>> {
    match self.current_api() {
      Some(api) => self.api.check_beta_key(&api, key, always_fetch),
      None => UpdateStream::ready(Update::failure(
        None,
        ResolveError::validation("no api is open"),
        Metadata::status("Rejected"),
      )),
    }
  }

  pub fn context(&self) -> SessionContext {
    lock(&self.context).clone()
  }

  pub fn current_book(&self) -> Option<Book> {
    lock(&self.context).book.clone()
  }

  pub fn current_api(&self) -> Option<Api> {
    lock(&self.context).api.clone()
  }

  /// Cancel everything in flight.
  pub fn close(&self) {
    self.slot.cancel();
    self.book.cancel();
    self.api.cancel();
    debug!("Session closed");
  }
}

/// One running `open_book` flow.
struct OpenBook<S, T> {
  book: BookRepository<S, T>,
  api: ApiRepository<S, T>,
  context: Arc<Mutex<SessionContext>>,
  ticket: SlotTicket<BookId>,
  tx: mpsc::UnboundedSender<OpenBookState>,
}

async fn next_update<P, R>(
  stream: &mut UpdateStream<P, R>,
  token: &CancellationToken,
) -> Option<Update<P, R>>
where
  P: Clone,
  R: Clone,
{
  // Cancellation wins over an update that is already buffered.
  tokio::select! {
    biased;
    _ = token.cancelled() => None,
    update = stream.next() => update,
  }
}

impl<S, T> OpenBook<S, T>
where
  S: CacheStorage + 'static,
  T: RemoteTransport + 'static,
{
  fn emit(&self, state: OpenBookState) {
    self.ticket.publish(|| {
      let _ = self.tx.send(state);
    });
  }

  async fn run(self, book_id: u64, always_fetch: bool) {
    let token = self.ticket.token().clone();

    let (book, degraded) = match self.resolve_book(book_id, always_fetch, &token).await {
      Some(resolved) => resolved,
      None => return,
    };

    let identity = ApiKey::for_book(&book);
    let mut held = None;
    let owned = self.ticket.publish(|| {
      let mut context = lock(&self.context);
      let same = context.book.as_ref().map(ApiKey::for_book) == Some(identity);
      context.book = Some(book.clone());
      if same {
        held = context.api.clone();
      } else {
        context.api = None;
      }
      let _ = self.tx.send(OpenBookState::UpstreamSucceeded {
        book: book.clone(),
        degraded,
      });
    });
    if !owned {
      debug!(book_id, "Open superseded before the api load");
      return;
    }

    match held {
      Some(api) if !always_fetch && ApiKey::for_api(&api) == identity => {
        debug!(?identity, "Book identity unchanged; keeping open api");
        self.emit(OpenBookState::DownstreamSucceeded { api });
      }
      _ => self.resolve_api(identity, always_fetch, &token).await,
    }
  }

  /// Resolve the book. `None` means the flow is over.
  async fn resolve_book(
    &self,
    book_id: u64,
    always_fetch: bool,
    token: &CancellationToken,
  ) -> Option<(Book, bool)> {
    let mut upstream = self.book.load(BookId(book_id), always_fetch);
    let mut count = 0;

    while let Some(update) = next_update(&mut upstream, token).await {
      match update {
        Update::Pending { .. } => self.emit(OpenBookState::UpstreamPending),
        Update::InProgress { values, .. } => {
          for book in values {
            count += 1;
            self.emit(OpenBookState::UpstreamProgress { count, book });
          }
        }
        Update::Success { result, .. } => return Some((result, false)),
        Update::Failure {
          partial: Some(book),
          error,
          ..
        } => {
          warn!(book_id, %error, "Continuing with cached book");
          return Some((book, true));
        }
        Update::Failure {
          partial: None,
          error,
          ..
        } => {
          self.emit(OpenBookState::UpstreamFailed { error });
          return None;
        }
      }
    }

    // Closed without a terminal: the book load was superseded.
    self.emit(OpenBookState::UpstreamFailed {
      error: ResolveError::Cancelled,
    });
    None
  }

  async fn resolve_api(&self, key: ApiKey, always_fetch: bool, token: &CancellationToken) {
    if token.is_cancelled() {
      return;
    }
    let mut downstream = self.api.load(key, always_fetch);
    let mut count = 0;

    while let Some(update) = next_update(&mut downstream, token).await {
      match update {
        Update::Pending { .. } => self.emit(OpenBookState::DownstreamPending),
        Update::InProgress { values, .. } => {
          for api in values {
            count += 1;
            self.emit(OpenBookState::DownstreamProgress { count, api });
          }
        }
        Update::Success { result, .. } => {
          self.ticket.publish(|| {
            lock(&self.context).api = Some(result.clone());
            let _ = self
              .tx
              .send(OpenBookState::DownstreamSucceeded { api: result });
          });
          info!(?key, "Book opened");
          return;
        }
        Update::Failure { partial, error, .. } => {
          self.emit(OpenBookState::DownstreamFailed { partial, error });
          return;
        }
      }
    }

    self.emit(OpenBookState::DownstreamFailed {
      partial: None,
      error: ResolveError::Cancelled,
    });
  }
}
