//! Ordered delivery of updates from a worker to any number of subscribers.
//!
//! Each unit of work owns one `UpdateSender`. Every emitted update is appended
//! to the sequence under a lock and fanned out to the subscribers' queues in
//! the same critical section, so all subscribers observe one total order.
//! Late subscribers get the history replayed first.
//!
//! # Example
//!
//! ```ignore
//! let mut updates = repository.load(BookId(7), true);
//!
//! // In an async host
//! while let Some(update) = updates.next().await {
//!     render(&update);
//! }
//!
//! // Or in an event loop tick
//! if updates.poll() {
//!     render(updates.latest().unwrap());
//! }
//! ```

use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::update::{Phase, Update};

struct Shared<P, R> {
  history: Vec<Update<P, R>>,
  subscribers: Vec<mpsc::UnboundedSender<Update<P, R>>>,
  phase: Phase,
  open: bool,
}

fn lock<P, R>(shared: &Mutex<Shared<P, R>>) -> MutexGuard<'_, Shared<P, R>> {
  shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected sender and first subscriber.
pub fn channel<P: Clone, R: Clone>() -> (UpdateSender<P, R>, UpdateStream<P, R>) {
  let (tx, rx) = mpsc::unbounded_channel();
  let shared = Arc::new(Mutex::new(Shared {
    history: Vec::new(),
    subscribers: vec![tx],
    phase: Phase::Fresh,
    open: true,
  }));

  let sender = UpdateSender {
    shared: Arc::clone(&shared),
  };
  let stream = UpdateStream {
    rx,
    shared,
    latest: None,
  };
  (sender, stream)
}

/// Producer half. Dropping it closes every subscriber's stream.
pub struct UpdateSender<P, R> {
  shared: Arc<Mutex<Shared<P, R>>>,
}

impl<P: Clone, R: Clone> UpdateSender<P, R> {
  /// Append `update` to the sequence and deliver it to every live subscriber.
  ///
  /// # Panics
  ///
  /// Panics if `update` violates the ordering of the protocol (see [`Update`]).
  pub fn emit(&self, update: Update<P, R>) {
    let mut shared = lock(&self.shared);
    shared.phase = shared.phase.advance(&update);

    // Subscribers that went away are dropped; the work carries on.
    shared
      .subscribers
      .retain(|tx| tx.send(update.clone()).is_ok());

    let terminal = update.is_terminal();
    shared.history.push(update);
    if terminal {
      shared.open = false;
      shared.subscribers.clear();
    }
  }
}

impl<P, R> Drop for UpdateSender<P, R> {
  fn drop(&mut self) {
    let mut shared = lock(&self.shared);
    shared.open = false;
    shared.subscribers.clear();
  }
}

/// Consumer half: an ordered stream of updates for one unit of work.
///
/// Dropping a stream unsubscribes; it never cancels the work.
pub struct UpdateStream<P, R> {
  rx: mpsc::UnboundedReceiver<Update<P, R>>,
  shared: Arc<Mutex<Shared<P, R>>>,
  latest: Option<Update<P, R>>,
}

impl<P: Clone, R: Clone> UpdateStream<P, R> {
  /// A stream that has already completed with `update`.
  pub fn ready(update: Update<P, R>) -> Self {
    let (sender, stream) = channel();
    sender.emit(update);
    stream
  }

  /// Wait for the next update. Returns `None` once the sequence is closed.
  pub async fn next(&mut self) -> Option<Update<P, R>> {
    let update = self.rx.recv().await?;
    self.latest = Some(update.clone());
    Some(update)
  }

  /// Drain whatever has arrived without waiting.
  ///
  /// Returns `true` if at least one update arrived. Call this in an event
  /// loop tick handler and render `latest()`.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(update) = self.rx.try_recv() {
      self.latest = Some(update);
      changed = true;
    }
    changed
  }

  /// The most recent update seen through `next()` or `poll()`.
  pub fn latest(&self) -> Option<&Update<P, R>> {
    self.latest.as_ref()
  }

  /// Wait for the sequence to close and return its terminal update.
  ///
  /// Returns `None` when the work was superseded or cancelled, since such a
  /// sequence closes without delivering a terminal.
  pub async fn terminal(mut self) -> Option<Update<P, R>> {
    let mut last = None;
    while let Some(update) = self.next().await {
      last = Some(update);
    }
    last.filter(Update::is_terminal)
  }

  /// Wait for the sequence to close and return every update received.
  pub async fn collect_all(mut self) -> Vec<Update<P, R>> {
    let mut updates = Vec::new();
    while let Some(update) = self.next().await {
      updates.push(update);
    }
    updates
  }

  /// Open another subscription to the same sequence, starting from the beginning.
  pub fn subscribe(&self) -> UpdateStream<P, R> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut shared = lock(&self.shared);
    for update in &shared.history {
      // The receiver is still in scope, so this cannot fail.
      let _ = tx.send(update.clone());
    }
    if shared.open {
      shared.subscribers.push(tx);
    }

    UpdateStream {
      rx,
      shared: Arc::clone(&self.shared),
      latest: None,
    }
  }
}

impl<P, R> Stream for UpdateStream<P, R>
where
  P: Clone + Unpin,
  R: Clone + Unpin,
{
  type Item = Update<P, R>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    match this.rx.poll_recv(cx) {
      Poll::Ready(Some(update)) => {
        this.latest = Some(update.clone());
        Poll::Ready(Some(update))
      }
      other => other,
    }
  }
}

impl<P: std::fmt::Debug, R: std::fmt::Debug> std::fmt::Debug for UpdateStream<P, R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("UpdateStream")
      .field("latest", &self.latest)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pipeline::{Metadata, ResolveError};
  use futures::StreamExt;

  type Sender = UpdateSender<u32, u32>;
  type Updates = UpdateStream<u32, u32>;

  #[tokio::test]
  async fn test_updates_arrive_in_order() {
    let (tx, rx): (Sender, Updates) = channel();
    tx.emit(Update::pending());
    tx.emit(Update::progress(1, Metadata::default()));
    tx.emit(Update::success(2, Metadata::default()));

    let labels: Vec<_> = rx.collect_all().await.iter().map(Update::label).collect();
    assert_eq!(labels, vec!["pending", "in_progress", "success"]);
  }

  #[tokio::test]
  async fn test_late_subscriber_gets_history() {
    let (tx, rx): (Sender, Updates) = channel();
    tx.emit(Update::progress(1, Metadata::default()));

    let late = rx.subscribe();
    tx.emit(Update::success(2, Metadata::default()));

    let first = rx.collect_all().await;
    let second = late.collect_all().await;
    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
  }

  #[tokio::test]
  async fn test_subscribe_after_close_replays_and_ends() {
    let (tx, rx): (Sender, Updates) = channel();
    tx.emit(Update::success(9, Metadata::default()));
    drop(tx);

    let late = rx.subscribe();
    assert_eq!(
      late.terminal().await,
      Some(Update::success(9, Metadata::default()))
    );
  }

  #[tokio::test]
  async fn test_dropped_sender_without_terminal_yields_none() {
    let (tx, rx): (Sender, Updates) = channel();
    tx.emit(Update::progress(1, Metadata::default()));
    drop(tx);

    assert_eq!(rx.terminal().await, None);
  }

  #[tokio::test]
  async fn test_dropping_a_subscriber_does_not_stop_emission() {
    let (tx, rx): (Sender, Updates) = channel();
    let other = rx.subscribe();
    drop(rx);

    tx.emit(Update::failure(None, ResolveError::Cancelled, Metadata::default()));
    assert!(other.terminal().await.is_some());
  }

  #[test]
  fn test_poll_tracks_latest() {
    let (tx, mut rx): (Sender, Updates) = channel();
    assert!(!rx.poll());

    tx.emit(Update::progress(1, Metadata::default()));
    tx.emit(Update::progress(2, Metadata::default()));
    assert!(rx.poll());
    assert_eq!(rx.latest(), Some(&Update::progress(2, Metadata::default())));
  }

  #[tokio::test]
  async fn test_stream_impl_yields_updates() {
    let rx: Updates = UpdateStream::ready(Update::success(3, Metadata::default()));
    let all: Vec<_> = rx.collect().await;
    assert_eq!(all, vec![Update::success(3, Metadata::default())]);
  }
}
