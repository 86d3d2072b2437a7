//! Test doubles shared by the unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::cache::{CacheStorage, CachedCollection, CachedEntity, Cacheable, MemoryStorage, QueryKey};
use crate::pipeline::{RemoteTransport, Request, Response};

#[derive(Clone)]
enum Scripted {
  Respond(Response),
  Fail(String),
}

/// Transport answering from a per-path script and recording every request.
///
/// The last scripted answer for a path repeats. Unscripted paths get a 404.
/// `pause` makes every call block inside `fetch` until `resume`.
#[derive(Default)]
pub struct ScriptedTransport {
  script: Mutex<HashMap<String, VecDeque<Scripted>>>,
  requests: Mutex<Vec<Request>>,
  paused: Mutex<bool>,
  resumed: Condvar,
}

impl ScriptedTransport {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn push(&self, path: &str, answer: Scripted) {
    self
      .script
      .lock()
      .unwrap()
      .entry(path.to_string())
      .or_default()
      .push_back(answer);
  }

  pub fn respond(&self, path: &str, status: u16, body: &str) {
    self.push(path, Scripted::Respond(Response::new(status, body)));
  }

  pub fn respond_json(&self, path: &str, body: serde_json::Value) {
    self.respond(path, 200, &body.to_string());
  }

  pub fn fail(&self, path: &str, reason: &str) {
    self.push(path, Scripted::Fail(reason.to_string()));
  }

  pub fn pause(&self) {
    *self.paused.lock().unwrap() = true;
  }

  pub fn resume(&self) {
    *self.paused.lock().unwrap() = false;
    self.resumed.notify_all();
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  pub fn calls(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn calls_to(&self, path: &str) -> usize {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.path == path)
      .count()
  }

  /// Wait until at least `count` requests have entered `fetch`.
  pub async fn wait_for_calls(&self, count: usize) {
    for _ in 0..400 {
      if self.calls() >= count {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} calls, saw {}", count, self.calls());
  }
}

impl RemoteTransport for ScriptedTransport {
  fn fetch(&self, request: &Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());

    let mut paused = self.paused.lock().unwrap();
    while *paused {
      paused = self.resumed.wait(paused).unwrap();
    }
    drop(paused);

    let answer = {
      let mut script = self.script.lock().unwrap();
      match script.get_mut(&request.path) {
        Some(queue) if queue.len() > 1 => queue.pop_front(),
        Some(queue) => queue.front().cloned(),
        None => None,
      }
    };

    match answer {
      Some(Scripted::Respond(response)) => Ok(response),
      Some(Scripted::Fail(reason)) => Err(eyre!("{}", reason).wrap_err(format!("{} failed", request))),
      None => Ok(Response::new(404, "")),
    }
  }
}

/// Store whose reads succeed and whose writes always fail.
///
/// Seed it through `inner` before handing it to a repository.
#[derive(Default)]
pub struct ReadOnlyStorage {
  pub inner: MemoryStorage,
}

fn read_only<T>() -> Result<T> {
  Err(eyre!("attempt to write a readonly database"))
}

impl CacheStorage for ReadOnlyStorage {
  fn get_entity<T: Cacheable>(&self, entity_key: &str) -> Result<Option<CachedEntity<T>>> {
    self.inner.get_entity(entity_key)
  }

  fn store_entity<T: Cacheable>(&self, _entity: &T) -> Result<()> {
    read_only()
  }

  fn store_entities<T: Cacheable>(&self, _entities: &[T]) -> Result<()> {
    read_only()
  }

  fn store_entity_with<T: Cacheable, M: Cacheable>(&self, _entity: &T, _related: &[M]) -> Result<()> {
    read_only()
  }

  fn delete_entity<T: Cacheable>(&self, _entity_key: &str) -> Result<bool> {
    read_only()
  }

  fn delete_all<T: Cacheable>(&self) -> Result<usize> {
    read_only()
  }

  fn get_collection<T: Cacheable>(&self, key: &dyn QueryKey) -> Result<Option<CachedCollection<T>>> {
    self.inner.get_collection(key)
  }

  fn replace_collection<T: Cacheable>(&self, _key: &dyn QueryKey, _entities: &[T]) -> Result<()> {
    read_only()
  }

  fn merge_collection<T: Cacheable>(&self, _key: &dyn QueryKey, _entities: &[T]) -> Result<()> {
    read_only()
  }
}
