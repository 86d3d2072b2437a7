//! The book catalog: entities, their wire and storage forms, and the
//! repositories that resolve them.

pub mod api_types;
pub mod cache;
mod client;
mod repository;
mod resolvers;
mod session;
pub mod types;

pub use client::HttpTransport;
pub use repository::{
  ApiRepository, BookRepository, BooksRepository, Catalog, ChapterRepository, ChaptersRepository,
  StorefrontRepository,
};
pub use resolvers::{
  ApiResolver, BetaKeyResolver, BookResolver, BooksResolver, ChapterResolver, ChaptersResolver,
  StorefrontResolver, StorefrontSnapshot,
};
pub use session::{OpenBookState, OpenBookStream, Session, SessionContext};
