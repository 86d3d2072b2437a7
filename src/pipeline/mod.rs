//! The data resolution pipeline.
//!
//! A [`Repository`] binds a [`Resolver`] to a [`CacheStorage`](crate::cache::CacheStorage)
//! and a [`RemoteTransport`]. Each `load` registers with the repository's
//! [`TaskSlot`], runs a [`ResolutionTask`] on the blocking pool and streams
//! [`Update`]s back through an [`UpdateStream`]:
//!
//! 1. read the local store
//! 2. serve the cached value, or show it as progress while refreshing
//! 3. fetch from the backend
//! 4. write the response back and re-read the store as the source of truth

mod error;
mod repository;
mod slot;
pub mod stream;
mod task;
mod transport;
mod update;

pub use error::ResolveError;
pub use repository::{Repository, TaskHandle};
pub use slot::{SlotTicket, TaskSlot};
pub use stream::{UpdateSender, UpdateStream};
pub use task::{Precheck, Resolution, ResolutionTask, Resolver};
pub use transport::{RemoteTransport, Request, Response};
pub use update::{Metadata, Update};
