// Public modules
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod formatter;
pub mod listing;
pub mod models;
pub mod pipeline;
pub mod publisher;
pub mod rewriter;
pub mod store;
pub mod tracker;

// Re-export commonly used types
pub use config::{Config, ListingMode, PublishTarget};
pub use error::{ExtractError, PersistenceError, PipelineError, Stage};
pub use extractor::{ArticleSelectors, ContentExtractor};
pub use fetcher::{Fetch, HttpFetcher};
pub use formatter::FormatOptions;
pub use listing::{Listing, ListingSelectors, ListingSource};
pub use models::{Category, ContentItem, Document, ListingEntry, Section, SectionKind};
pub use pipeline::{PassReport, Pipeline, PipelineOptions};
pub use publisher::{DirectoryPublisher, GithubDispatchPublisher, PublishOutcome, PublishSink};
pub use rewriter::{ClaudeRewriter, TextTransform};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use tracker::CrawlTracker;
