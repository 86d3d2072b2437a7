//! Single-flight registration of in-flight work.
//!
//! A `TaskSlot` holds at most one live unit of work. Starting a new one
//! cancels and forgets the previous one before the new one is registered.
//! Delivery of updates goes through [`SlotTicket::publish`], which checks
//! ownership under the same lock, so once `start` returns nothing from a
//! superseded task can reach its subscribers.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Current<K> {
  id: u64,
  key: K,
  token: CancellationToken,
}

/// Register holding the one live task of a repository flow.
pub struct TaskSlot<K> {
  name: &'static str,
  current: Mutex<Option<Current<K>>>,
  next_id: AtomicU64,
}

impl<K: Clone + Debug + PartialEq> TaskSlot<K> {
  pub fn new(name: &'static str) -> Arc<Self> {
    Arc::new(Self {
      name,
      current: Mutex::new(None),
      next_id: AtomicU64::new(1),
    })
  }

  fn lock(&self) -> MutexGuard<'_, Option<Current<K>>> {
    self.current.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Supersede whatever is running and register new work for `key`.
  pub fn start(self: &Arc<Self>, key: K) -> SlotTicket<K> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let token = CancellationToken::new();

    let mut current = self.lock();
    if let Some(previous) = current.take() {
      previous.token.cancel();
      debug!(
        slot = self.name,
        superseded = previous.id,
        key = ?previous.key,
        "Superseded in-flight task"
      );
    }
    *current = Some(Current {
      id,
      key: key.clone(),
      token: token.clone(),
    });
    drop(current);

    debug!(slot = self.name, task = id, key = ?key, "Started task");
    SlotTicket {
      id,
      token,
      slot: Arc::clone(self),
    }
  }

  /// Cancel the current task, if any. Returns whether something was cancelled.
  pub fn cancel(&self) -> bool {
    match self.lock().take() {
      Some(previous) => {
        previous.token.cancel();
        debug!(slot = self.name, task = previous.id, key = ?previous.key, "Cancelled task");
        true
      }
      None => false,
    }
  }

  /// Cancel the current task only if it is working on `key`.
  pub fn cancel_key(&self, key: &K) -> bool {
    let mut current = self.lock();
    match current.as_ref() {
      Some(running) if running.key == *key => {
        running.token.cancel();
        debug!(slot = self.name, task = running.id, key = ?key, "Cancelled task");
        *current = None;
        true
      }
      _ => false,
    }
  }

  pub fn is_busy(&self) -> bool {
    self.lock().is_some()
  }

  fn release(&self, id: u64) {
    let mut current = self.lock();
    if current.as_ref().is_some_and(|c| c.id == id) {
      *current = None;
    }
  }
}

/// Proof of ownership of a slot for the lifetime of one task.
///
/// Dropping the ticket frees the slot if the task still owns it.
pub struct SlotTicket<K: Clone + Debug + PartialEq> {
  id: u64,
  token: CancellationToken,
  slot: Arc<TaskSlot<K>>,
}

impl<K: Clone + Debug + PartialEq> SlotTicket<K> {
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Run `deliver` only while this task still owns the slot.
  ///
  /// The slot lock is held while `deliver` runs; it must not block.
  pub fn publish(&self, deliver: impl FnOnce()) -> bool {
    let current = self.slot.lock();
    let owns = current.as_ref().is_some_and(|c| c.id == self.id);
    if owns && !self.token.is_cancelled() {
      deliver();
      true
    } else {
      false
    }
  }
}

impl<K: Clone + Debug + PartialEq> Drop for SlotTicket<K> {
  fn drop(&mut self) {
    self.slot.release(self.id);
  }
}
