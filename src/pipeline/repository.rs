//! A resolver bound to a store, a transport and a single-flight slot.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use super::slot::TaskSlot;
use super::stream::{self, UpdateStream};
use super::task::{Resolution, ResolutionTask, Resolver};
use super::update::Update;
use crate::cache::CacheStorage;
use crate::pipeline::RemoteTransport;

/// Entity-specific entry point to the resolution pipeline.
///
/// Every `load` runs on the runtime's blocking pool. Loads through the same
/// repository share one slot: starting a load supersedes the one in flight.
pub struct Repository<R: Resolver, S, T> {
  resolver: Arc<R>,
  store: Arc<S>,
  transport: Arc<T>,
  slot: Arc<TaskSlot<R::Key>>,
  runtime: Handle,
}

impl<R, S, T> Repository<R, S, T>
where
  R: Resolver,
  S: CacheStorage + 'static,
  T: RemoteTransport + 'static,
{
  pub fn new(resolver: R, store: Arc<S>, transport: Arc<T>, runtime: Handle) -> Self {
    Self {
      resolver: Arc::new(resolver),
      store,
      transport,
      slot: TaskSlot::new(R::NAME),
      runtime,
    }
  }

  /// Resolve `key`, streaming every transition to the returned subscription.
  ///
  /// With `always_fetch == false` a cached value is delivered as is; a cache
  /// miss is always fetched.
  pub fn load(&self, key: R::Key, always_fetch: bool) -> UpdateStream<R::Domain, R::Domain> {
    self.spawn(key, always_fetch).updates
  }

  /// Like `load`, but also returns the task's own outcome.
  pub fn spawn(&self, key: R::Key, always_fetch: bool) -> TaskHandle<R::Domain> {
    let ticket = self.slot.start(key.clone());
    let id = ticket.id();
    let (sender, updates) = stream::channel();
    ticket.publish(|| sender.emit(Update::pending()));

    let resolver = Arc::clone(&self.resolver);
    let store = Arc::clone(&self.store);
    let transport = Arc::clone(&self.transport);

    let join = self.runtime.spawn_blocking(move || {
      let token = ticket.token().clone();
      let task = ResolutionTask {
        resolver: resolver.as_ref(),
        store: store.as_ref(),
        transport: transport.as_ref(),
        key: &key,
        always_fetch,
        token: &token,
      };

      let outcome = task.run(|update| {
        ticket.publish(|| sender.emit(update));
      });

      if !ticket.publish(|| sender.emit(outcome.clone())) {
        debug!(
          resolver = R::NAME,
          task = id,
          outcome = outcome.label(),
          "Suppressed terminal update of superseded task"
        );
      }
      outcome
    });

    TaskHandle { id, updates, join }
  }

  /// Cancel whatever this repository is resolving.
  pub fn cancel(&self) -> bool {
    self.slot.cancel()
  }

  /// Cancel the in-flight load only if it is for `key`.
  pub fn cancel_key(&self, key: &R::Key) -> bool {
    self.slot.cancel_key(key)
  }

  /// Whether a load is in flight.
  pub fn is_busy(&self) -> bool {
    self.slot.is_busy()
  }

  pub fn resolver(&self) -> &R {
    &self.resolver
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }
}

impl<R: Resolver, S, T> Clone for Repository<R, S, T> {
  fn clone(&self) -> Self {
    Self {
      resolver: Arc::clone(&self.resolver),
      store: Arc::clone(&self.store),
      transport: Arc::clone(&self.transport),
      slot: Arc::clone(&self.slot),
      runtime: self.runtime.clone(),
    }
  }
}

/// A started load: its subscription plus the task's own final update.
pub struct TaskHandle<D> {
  id: u64,
  pub updates: UpdateStream<D, D>,
  join: JoinHandle<Resolution<D>>,
}

impl<D> TaskHandle<D> {
  pub fn id(&self) -> u64 {
    self.id
  }

  /// Wait for the task to finish and return its terminal update, even when
  /// it was suppressed from the subscription.
  ///
  /// A panic inside the task (a protocol violation) is resumed here.
  pub async fn outcome(self) -> Resolution<D> {
    match self.join.await {
      Ok(outcome) => outcome,
      Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
      Err(_) => Update::cancelled(None),
    }
  }
}
