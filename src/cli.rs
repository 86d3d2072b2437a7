//! Command-line host: starts loads and prints every update as it arrives.

use clap::{Args, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::cache::{CacheSource, CacheStorage, MemoryStorage, SqliteStorage};
use crate::catalog::types::{
  AllBooks, Api, ApiKey, BetaKeyGrant, Book, BookId, Chapter, ChapterKey, ChapterSummary,
  Storefront, StorefrontKey,
};
use crate::catalog::{Catalog, HttpTransport, OpenBookState, OpenBookStream, Session};
use crate::config::{CacheBackend, Config};
use crate::pipeline::{Metadata, Resolution, Update, UpdateStream};

#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "An offline-first client for a book catalog, chapters and storefront content")]
#[command(version)]
pub struct Cli {
  /// Path to config file (default: $XDG_CONFIG_HOME/folio/config.yaml)
  #[arg(short, long, global = true)]
  pub config: Option<PathBuf>,

  /// Mirror logs to stderr
  #[arg(short, long, global = true)]
  pub verbose: bool,

  /// Print one JSON object per update
  #[arg(long, global = true)]
  pub json: bool,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct LoadArgs {
  /// Serve cached values without asking the server
  #[arg(long)]
  pub cached: bool,
}

impl LoadArgs {
  fn always_fetch(self) -> bool {
    !self.cached
  }
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// List every book in the catalog
  Books {
    #[command(flatten)]
    load: LoadArgs,
  },
  /// Show one book
  Book {
    id: u64,
    #[command(flatten)]
    load: LoadArgs,
  },
  /// List the chapters of a book
  Chapters {
    book_id: u64,
    #[command(flatten)]
    load: LoadArgs,
  },
  /// Show one chapter
  Chapter {
    book_id: u64,
    number: u32,
    #[command(flatten)]
    load: LoadArgs,
  },
  /// Show a book's api; without --version the book is resolved first
  Api {
    book_id: u64,
    #[arg(long)]
    version: Option<u32>,
    #[command(flatten)]
    load: LoadArgs,
  },
  /// Open a book and check a beta key against its api
  BetaKey {
    book_id: u64,
    /// Key to check (default: beta_key from the config or FOLIO_BETA_KEY)
    #[arg(long)]
    key: Option<String>,
    #[command(flatten)]
    load: LoadArgs,
  },
  /// Show the storefront
  Storefront {
    #[command(flatten)]
    load: LoadArgs,
  },
  /// Manage the local cache
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommand {
  /// Remove every cached entity
  Clear,
}

/// Run `cli` against the configured store and server.
pub async fn run(cli: Cli, config: Config) -> Result<()> {
  match config.cache.backend {
    CacheBackend::Sqlite => {
      let store = match &config.cache.path {
        Some(path) => SqliteStorage::open_at(path)?,
        None => SqliteStorage::open()?,
      };
      execute(cli, &config, Arc::new(store)).await
    }
    CacheBackend::Memory => execute(cli, &config, Arc::new(MemoryStorage::new())).await,
  }
}

async fn execute<S: CacheStorage + 'static>(cli: Cli, config: &Config, store: Arc<S>) -> Result<()> {
  let runtime = Handle::current();
  let transport = Arc::new(HttpTransport::new(&config.server, runtime.clone())?);
  let catalog = Catalog::new(store, transport, runtime.clone());
  let printer = Printer { json: cli.json };

  match cli.command {
    Command::Books { load } => printer.drain(catalog.books.load(AllBooks, load.always_fetch())).await,
    Command::Book { id, load } => printer.drain(catalog.book.load(BookId(id), load.always_fetch())).await,
    Command::Chapters { book_id, load } => {
      printer
        .drain(catalog.chapters.load(BookId(book_id), load.always_fetch()))
        .await
    }
    Command::Chapter {
      book_id,
      number,
      load,
    } => {
      let key = ChapterKey { book_id, number };
      printer.drain(catalog.chapter.load(key, load.always_fetch())).await
    }
    Command::Api {
      book_id,
      version: Some(api_version),
      load,
    } => {
      let key = ApiKey {
        book_id,
        api_version,
      };
      printer.drain(catalog.api.load(key, load.always_fetch())).await
    }
    Command::Api {
      book_id,
      version: None,
      load,
    } => {
      let session = Session::new(&catalog, runtime);
      printer
        .drain_open(session.open_book(book_id, load.always_fetch()))
        .await
    }
    Command::BetaKey { book_id, key, load } => {
      let session = Session::new(&catalog, runtime);
      printer
        .drain_open(session.open_book(book_id, load.always_fetch()))
        .await?;
      let key = key.or_else(|| config.beta_key.clone());
      printer
        .drain(session.check_beta_key(key, load.always_fetch()))
        .await
    }
    Command::Storefront { load } => {
      printer
        .drain(catalog.storefront.load(StorefrontKey, load.always_fetch()))
        .await
    }
    Command::Cache {
      command: CacheCommand::Clear,
    } => {
      let removed = catalog.clear_cache()?;
      if printer.json {
        println!("{}", serde_json::json!({ "removed": removed }));
      } else {
        println!("Removed {} cached entries", removed);
      }
      Ok(())
    }
  }
}

// ============================================================================
// Output
// ============================================================================

/// Plain-text rendering of a domain value.
pub trait Render {
  fn render(&self) -> String;
}

impl Render for Book {
  fn render(&self) -> String {
    let author = self
      .author
      .as_ref()
      .map(|a| format!(" by {}", a))
      .unwrap_or_default();
    format!(
      "#{} {}{} (api v{}, {} chapters)",
      self.id, self.title, author, self.api_version, self.chapter_count
    )
  }
}

impl Render for Vec<Book> {
  fn render(&self) -> String {
    if self.is_empty() {
      return "No books".to_string();
    }
    self.iter().map(Book::render).collect::<Vec<_>>().join("\n")
  }
}

impl Render for Vec<ChapterSummary> {
  fn render(&self) -> String {
    if self.is_empty() {
      return "No chapters".to_string();
    }
    self
      .iter()
      .map(|c| format!("{:>3}. {}", c.number, c.title))
      .collect::<Vec<_>>()
      .join("\n")
  }
}

impl Render for Chapter {
  fn render(&self) -> String {
    format!("Chapter {}: {}\n\n{}", self.number, self.title, self.body)
  }
}

impl Render for Api {
  fn render(&self) -> String {
    let survey = self
      .survey_link
      .as_ref()
      .map(|l| format!(", survey {}", l))
      .unwrap_or_default();
    format!(
      "Book {} api v{}: mode {}{}",
      self.book_id, self.api_version, self.mode, survey
    )
  }
}

impl Render for Option<BetaKeyGrant> {
  fn render(&self) -> String {
    match self {
      Some(grant) => format!("Beta key {} accepted", grant.key),
      None => "No beta key required".to_string(),
    }
  }
}

impl Render for Storefront {
  fn render(&self) -> String {
    let mut lines = Vec::new();
    for section in &self.sections {
      lines.push(section.title.clone());
      for book in &section.books {
        lines.push(format!("  {}", book.render()));
      }
    }
    if lines.is_empty() {
      return "Storefront is empty".to_string();
    }
    lines.join("\n")
  }
}

fn describe(metadata: &Metadata) -> String {
  let mut parts = Vec::new();
  if let Some(status) = &metadata.status {
    parts.push(status.clone());
  }
  match metadata.source {
    Some(CacheSource::Network) => parts.push("from server".to_string()),
    Some(CacheSource::CacheFresh) => parts.push("from cache".to_string()),
    Some(CacheSource::CacheStale) | Some(CacheSource::Offline) => parts.push("stale".to_string()),
    None => {}
  }
  if let Some(cached_at) = metadata.cached_at {
    parts.push(format!("cached {}", cached_at.format("%Y-%m-%d %H:%M:%S UTC")));
  }
  parts.join(", ")
}

struct Printer {
  json: bool,
}

impl Printer {
  fn print_json<V: Serialize>(&self, value: &V) -> Result<()> {
    let line = serde_json::to_string(value).map_err(|e| eyre!("Failed to encode update: {}", e))?;
    println!("{}", line);
    Ok(())
  }

  fn print_update<D: Render + Serialize>(&self, update: &Resolution<D>) -> Result<()> {
    if self.json {
      return self.print_json(update);
    }

    let details = describe(update.metadata());
    match update {
      Update::Pending { .. } => println!("... loading"),
      Update::InProgress { values, .. } => {
        for value in values {
          println!("[{}]\n{}", details, value.render());
        }
      }
      Update::Success { result, .. } => println!("[{}]\n{}", details, result.render()),
      Update::Failure { partial, error, .. } => {
        eprintln!("error: {} [{}]", error, details);
        if let Some(partial) = partial {
          println!("{}", partial.render());
        }
      }
    }
    Ok(())
  }

  /// Print every update of `updates` in order and report how the work ended.
  async fn drain<D>(&self, mut updates: UpdateStream<D, D>) -> Result<()>
  where
    D: Render + Serialize + Clone,
  {
    let mut last = None;
    while let Some(update) = updates.next().await {
      self.print_update(&update)?;
      last = Some(update);
    }

    match last {
      Some(Update::Success { .. }) => Ok(()),
      Some(Update::Failure { error, .. }) => Err(eyre!("{}", error)),
      _ => Err(eyre!("Load ended without a result")),
    }
  }

  fn print_state(&self, state: &OpenBookState) -> Result<()> {
    if self.json {
      return self.print_json(state);
    }

    match state {
      OpenBookState::WaitingOnUpstream => println!("... opening book"),
      OpenBookState::UpstreamPending => println!("... loading book"),
      OpenBookState::UpstreamProgress { book, .. } => println!("[cached book]\n{}", book.render()),
      OpenBookState::UpstreamFailed { error } => eprintln!("error: book unavailable: {}", error),
      OpenBookState::UpstreamSucceeded { book, degraded } => {
        let tag = if *degraded { "book, stale" } else { "book" };
        println!("[{}]\n{}", tag, book.render());
      }
      OpenBookState::DownstreamPending => println!("... loading api"),
      OpenBookState::DownstreamProgress { api, .. } => println!("[cached api]\n{}", api.render()),
      OpenBookState::DownstreamSucceeded { api } => println!("[api]\n{}", api.render()),
      OpenBookState::DownstreamFailed { partial, error } => {
        eprintln!("error: api unavailable: {}", error);
        if let Some(api) = partial {
          println!("{}", api.render());
        }
      }
    }
    Ok(())
  }

  async fn drain_open(&self, mut states: OpenBookStream) -> Result<()> {
    let mut last = None;
    while let Some(state) = states.next().await {
      self.print_state(&state)?;
      last = Some(state);
    }

    match last {
      Some(OpenBookState::DownstreamSucceeded { .. }) => Ok(()),
      Some(OpenBookState::UpstreamFailed { error }) | Some(OpenBookState::DownstreamFailed { error, .. }) => {
        Err(eyre!("{}", error))
      }
      _ => Err(eyre!("Opening the book ended without a result")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::types::{IgistMode, StoreSection};
  use clap::CommandFactory;

  #[test]
  fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
  }

  #[test]
  fn test_load_commands_fetch_unless_cached() {
    let cli = Cli::try_parse_from(["folio", "chapter", "3", "12"]).unwrap();
    match cli.command {
      Command::Chapter {
        book_id,
        number,
        load,
      } => {
        assert_eq!((book_id, number), (3, 12));
        assert!(load.always_fetch());
      }
      other => panic!("unexpected {:?}", other),
    }

    let cli = Cli::try_parse_from(["folio", "--json", "books", "--cached"]).unwrap();
    assert!(cli.json);
    assert!(matches!(cli.command, Command::Books { load } if !load.always_fetch()));
  }

  #[test]
  fn test_api_version_is_optional() {
    let cli = Cli::try_parse_from(["folio", "api", "7"]).unwrap();
    assert!(matches!(cli.command, Command::Api { version: None, .. }));

    let cli = Cli::try_parse_from(["folio", "api", "7", "--version", "2"]).unwrap();
    assert!(matches!(cli.command, Command::Api { version: Some(2), .. }));
  }

  #[test]
  fn test_cache_clear_parses() {
    let cli = Cli::try_parse_from(["folio", "cache", "clear"]).unwrap();
    assert!(matches!(
      cli.command,
      Command::Cache {
        command: CacheCommand::Clear
      }
    ));
  }

  #[test]
  fn test_render_api_and_gate() {
    let api = Api {
      book_id: 7,
      api_version: 2,
      mode: IgistMode::RequireBetaKey,
      survey_link: Some("https://x".to_string()),
    };
    assert_eq!(api.render(), "Book 7 api v2: mode REQUIRE_BETA_KEY, survey https://x");
    assert_eq!(None::<BetaKeyGrant>.render(), "No beta key required");
  }

  #[test]
  fn test_render_storefront_sections() {
    let storefront = Storefront {
      sections: vec![StoreSection {
        title: "New".to_string(),
        books: vec![Book {
          id: 1,
          title: "One".to_string(),
          author: Some("A. Writer".to_string()),
          api_version: 1,
          cover_url: None,
          chapter_count: 3,
        }],
      }],
    };
    assert_eq!(
      storefront.render(),
      "New\n  #1 One by A. Writer (api v1, 3 chapters)"
    );
  }

  #[test]
  fn test_describe_metadata() {
    let metadata = Metadata::status("Refreshing from server").with_source(CacheSource::CacheStale);
    assert_eq!(describe(&metadata), "Refreshing from server, stale");
  }
}
