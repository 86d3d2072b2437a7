//! Offline-first client for a book catalog.
//!
//! Every entity is resolved through the same pipeline: serve what the local
//! cache holds, refresh it from the server, write the answer back and deliver
//! what the cache then holds, streaming each step to subscribers.

pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod logging;
pub mod pipeline;

#[cfg(test)]
mod testing;
