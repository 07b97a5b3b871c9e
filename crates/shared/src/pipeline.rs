use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{PipelineError, Stage};
use crate::extractor::ContentExtractor;
use crate::fetcher::Fetch;
use crate::formatter::{self, FormatOptions};
use crate::listing::{self, ListingSelectors};
use crate::models::{Category, ListingEntry};
use crate::publisher::{PostMetadata, PublishOutcome, PublishRequest, PublishSink};
use crate::rewriter::{self, TextTransform};
use crate::store::KeyValueStore;
use crate::tracker::{CrawlTracker, PassWatermark, ProcessedMarker};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Listing URLs to crawl, with the category their posts start in.
    pub sources: Vec<(Url, Category)>,
    pub listing_selectors: ListingSelectors,
    /// Maximum documents attempted per pass.
    pub batch_size: usize,
    pub format: FormatOptions,
    pub watermark_enabled: bool,
    pub dedup_enabled: bool,
    /// Used when the rewriter names a category outside the known set.
    pub default_category: Category,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub source_url: String,
    pub path: String,
    pub filename: String,
    pub category: Category,
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub cutoff: Option<DateTime<Utc>>,
    pub discovered: usize,
    pub skipped_processed: usize,
    pub attempted: usize,
    pub deferred: usize,
    pub failed: usize,
    pub listing_failures: usize,
    pub published: Vec<PublishedPost>,
    /// Set when the watermark was advanced and stored.
    pub watermark: Option<DateTime<Utc>>,
}

/// One crawl pass over all listing sources, one document at a time.
pub struct Pipeline {
    fetcher: Box<dyn Fetch>,
    rewriter: Box<dyn TextTransform>,
    publisher: Box<dyn PublishSink>,
    tracker: CrawlTracker<Box<dyn KeyValueStore>>,
    extractor: ContentExtractor,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        fetcher: Box<dyn Fetch>,
        rewriter: Box<dyn TextTransform>,
        publisher: Box<dyn PublishSink>,
        tracker: CrawlTracker<Box<dyn KeyValueStore>>,
        extractor: ContentExtractor,
        options: PipelineOptions,
    ) -> Self {
        Self {
            fetcher,
            rewriter,
            publisher,
            tracker,
            extractor,
            options,
        }
    }

    pub fn tracker(&self) -> &CrawlTracker<Box<dyn KeyValueStore>> {
        &self.tracker
    }

    pub async fn run(&self, now: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();

        let loaded = if self.options.watermark_enabled {
            self.tracker.load_watermark(now).await
        } else {
            self.tracker.cold_start(now)
        };
        report.cutoff = Some(loaded);
        info!("Crawling entries newer than {}", loaded);

        let candidates = self.discover(loaded, &mut report).await;
        report.discovered = candidates.len();

        let mut pass = PassWatermark::new();
        let mut remaining = candidates.into_iter();

        while let Some((entry, category)) = remaining.next() {
            if report.attempted >= self.options.batch_size {
                pass.defer(entry.last_modified);
                for (later, _) in remaining.by_ref() {
                    pass.defer(later.last_modified);
                    report.deferred += 1;
                }
                report.deferred += 1;
                info!(
                    "Batch limit of {} reached, deferring {} entries to the next run",
                    self.options.batch_size, report.deferred
                );
                break;
            }

            if self.options.dedup_enabled && self.tracker.is_processed(&entry.url).await {
                debug!("Already processed, skipping {}", entry.url);
                report.skipped_processed += 1;
                continue;
            }

            report.attempted += 1;
            pass.observe(entry.last_modified);

            match self.process(&entry, category, now).await {
                Ok(post) => {
                    info!("Published {} -> {}", post.source_url, post.path);
                    if self.options.dedup_enabled {
                        let marker = ProcessedMarker {
                            url: entry.url.clone(),
                            processed_at: now,
                            path: Some(post.path.clone()),
                        };
                        if let Err(e) = self.tracker.mark_processed(&marker).await {
                            warn!("Could not record {} as processed: {}", entry.url, e);
                        }
                    }
                    report.published.push(post);
                }
                Err((stage, e)) => {
                    error!(url = %entry.url, stage = %stage, "Skipping document: {}", e);
                    report.failed += 1;
                }
            }
        }

        if self.options.watermark_enabled {
            if let Some(next) = pass.advance_from(loaded) {
                match self.tracker.record_watermark(next).await {
                    Ok(()) => {
                        info!("Watermark advanced to {}", next);
                        report.watermark = Some(next);
                    }
                    Err(e) => warn!("Could not store watermark {}: {}", next, e),
                }
            }
        }

        report
    }

    /// Recent entries from every source, first occurrence of a URL wins.
    /// Ordered oldest first with unknown dates last, so a capped batch
    /// leaves only newer entries behind.
    async fn discover(
        &self,
        cutoff: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Vec<(ListingEntry, Category)> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for (listing_url, category) in &self.options.sources {
            let body = match self.fetcher.fetch(listing_url.as_str()).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Could not fetch listing {}: {}", listing_url, e);
                    report.listing_failures += 1;
                    continue;
                }
            };

            let listing = match listing::parse_listing(&body, listing_url, &self.options.listing_selectors) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Could not parse listing {}: {}", listing_url, e);
                    report.listing_failures += 1;
                    continue;
                }
            };

            let total = listing.entries.len();
            let recent = listing.recent(cutoff);
            info!("{}: {} recent of {} entries", listing_url, recent.len(), total);

            for entry in recent {
                if seen.insert(entry.url.clone()) {
                    candidates.push((entry, *category));
                }
            }
        }

        candidates.sort_by_key(|(entry, _)| (entry.last_modified.is_none(), entry.last_modified));
        candidates
    }

    async fn process(
        &self,
        entry: &ListingEntry,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<PublishedPost, (Stage, PipelineError)> {
        let html = self
            .fetcher
            .fetch(&entry.url)
            .await
            .map_err(|e| (Stage::Fetch, e))?;

        let mut document = self
            .extractor
            .extract(&html, &entry.url, category)
            .map_err(|e| (Stage::Extract, e.into()))?;

        let formatted = formatter::format(&document, &self.options.format);
        let word_count = formatter::word_count(&formatted);
        info!(
            words = word_count,
            sections = document.section_count(),
            "Extracted \"{}\"",
            document.title()
        );

        let prompt = rewriter::build_rewrite_prompt(&formatted, &document, now);
        let generated = self
            .rewriter
            .transform(&prompt)
            .await
            .map_err(|e| (Stage::Generate, e))?;

        if let Some(classified) = rewriter::classify_category(&generated, self.options.default_category) {
            if classified != document.category() {
                debug!("Reclassified {} from {} to {}", entry.url, document.category(), classified);
            }
            document.set_category(classified);
        }

        let request = PublishRequest {
            title: rewriter::generated_title(&generated).unwrap_or_else(|| document.title().to_string()),
            metadata: PostMetadata {
                category: document.category(),
                source_title: document.title().to_string(),
                word_count,
                section_count: document.section_count(),
                generated_word_count: formatter::word_count(&generated),
            },
            content: generated,
            source_url: entry.url.clone(),
        };

        match self.publisher.publish(&request).await {
            PublishOutcome::Published { path, filename } => Ok(PublishedPost {
                source_url: entry.url.clone(),
                path,
                filename,
                category: document.category(),
            }),
            PublishOutcome::Failed { error } => Err((Stage::Publish, PipelineError::Publish(error))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ArticleSelectors;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const LISTING_URL: &str = "https://blog.example.com/tag/crm/";

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, d, 9, 0, 0).unwrap()
    }

    fn article(title: &str) -> String {
        format!(
            r#"<h1 class="article-title">{}</h1>
            <section class="gh-content"><p>Lead paragraph.</p><h2>Details</h2><ul><li>x</li></ul></section>"#,
            title
        )
    }

    fn card(slug: &str, date: &str) -> String {
        format!(
            r#"<article><a class="post-card-image-link" href="/{}/">img</a><time datetime="{}">d</time></article>"#,
            slug, date
        )
    }

    #[derive(Default)]
    struct FakeWeb {
        pages: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeWeb {
        fn page(mut self, url: &str, body: String) -> Self {
            self.pages.insert(url.to_string(), body);
            self
        }
    }

    #[async_trait]
    impl Fetch for Arc<FakeWeb> {
        async fn fetch(&self, url: &str) -> Result<String, PipelineError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.pages.get(url).cloned().ok_or_else(|| PipelineError::Network {
                url: url.to_string(),
                message: "HTTP error: 404 Not Found".to_string(),
            })
        }
    }

    /// Echoes the title line back as front matter; fails on "boom".
    struct FakeRewriter {
        category: &'static str,
    }

    #[async_trait]
    impl TextTransform for FakeRewriter {
        async fn transform(&self, prompt: &str) -> Result<String, PipelineError> {
            if prompt.contains("Title: boom") {
                return Err(PipelineError::Generation("model refused".to_string()));
            }
            let title = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Title: "))
                .unwrap_or("untitled");
            Ok(format!(
                "---\ntitle: \"Rewritten {}\"\ncategory: {}\n---\n\nBody",
                title, self.category
            ))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<PublishRequest>>,
    }

    #[async_trait]
    impl PublishSink for Arc<RecordingSink> {
        async fn publish(&self, request: &PublishRequest) -> PublishOutcome {
            self.published.lock().unwrap().push(request.clone());
            let (path, filename) = crate::publisher::post_path(request.metadata.category, &request.title);
            PublishOutcome::Published { path, filename }
        }
    }

    fn options(batch_size: usize) -> PipelineOptions {
        PipelineOptions {
            sources: vec![(Url::parse(LISTING_URL).unwrap(), Category::Crm)],
            listing_selectors: ListingSelectors::default(),
            batch_size,
            format: FormatOptions::default(),
            watermark_enabled: true,
            dedup_enabled: true,
            default_category: Category::General,
        }
    }

    fn pipeline(
        web: Arc<FakeWeb>,
        sink: Arc<RecordingSink>,
        store: Box<dyn KeyValueStore>,
        category: &'static str,
        batch_size: usize,
    ) -> Pipeline {
        Pipeline::new(
            Box::new(web),
            Box::new(FakeRewriter { category }),
            Box::new(sink),
            CrawlTracker::new(store, Duration::weeks(2)),
            ContentExtractor::new(&ArticleSelectors::default()).unwrap(),
            options(batch_size),
        )
    }

    fn listing(cards: &[(&str, &str)]) -> String {
        let cards: String = cards.iter().map(|(slug, date)| card(slug, date)).collect();
        format!("<html><body>{}</body></html>", cards)
    }

    #[tokio::test]
    async fn test_pass_publishes_and_advances_watermark() {
        let web = Arc::new(
            FakeWeb::default()
                .page(LISTING_URL, listing(&[("b", "2026-06-12"), ("a", "2026-06-10"), ("old", "2026-05-01")]))
                .page("https://blog.example.com/a/", article("Alpha"))
                .page("https://blog.example.com/b/", article("Beta")),
        );
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(web.clone(), sink.clone(), Box::new(MemoryStore::new()), "crm", 10);

        let report = pipeline.run(day(15)).await;

        assert_eq!(report.discovered, 2);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.published.len(), 2);
        assert_eq!(report.published[0].path, "crm/rewritten-alpha.mdx");
        assert_eq!(report.watermark, Some(Utc.with_ymd_and_hms(2026, 6, 12, 0, 0, 0).unwrap()));

        let published = sink.published.lock().unwrap();
        assert_eq!(published[1].source_url, "https://blog.example.com/b/");
        assert_eq!(published[1].metadata.source_title, "Beta");
        assert_eq!(published[1].metadata.section_count, 2);
        assert!(!web.requests.lock().unwrap().contains(&"https://blog.example.com/old/".to_string()));
    }

    #[tokio::test]
    async fn test_second_pass_finds_nothing_new() {
        let web = Arc::new(
            FakeWeb::default()
                .page(LISTING_URL, listing(&[("a", "2026-06-10")]))
                .page("https://blog.example.com/a/", article("Alpha")),
        );
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(web, sink.clone(), Box::new(MemoryStore::new()), "crm", 10);

        let first = pipeline.run(day(15)).await;
        assert_eq!(first.published.len(), 1);

        let second = pipeline.run(day(16)).await;
        assert_eq!(second.discovered, 0);
        assert_eq!(second.attempted, 0);
        assert_eq!(second.watermark, None);
        assert_eq!(sink.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_cap_takes_oldest_first_and_leaves_the_rest() {
        let web = Arc::new(
            FakeWeb::default()
                .page(
                    LISTING_URL,
                    listing(&[("c", "2026-06-12"), ("b", "2026-06-11"), ("a", "2026-06-10")]),
                )
                .page("https://blog.example.com/a/", article("Alpha"))
                .page("https://blog.example.com/b/", article("Beta"))
                .page("https://blog.example.com/c/", article("Gamma")),
        );
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(web, sink, Box::new(MemoryStore::new()), "crm", 1);

        let report = pipeline.run(day(15)).await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.deferred, 2);
        assert_eq!(report.published[0].source_url, "https://blog.example.com/a/");
        assert_eq!(report.watermark, Some(Utc.with_ymd_and_hms(2026, 6, 10, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_deferred_entries_are_published_by_later_runs() {
        let web = Arc::new(
            FakeWeb::default()
                .page(
                    LISTING_URL,
                    listing(&[("c", "2026-06-12"), ("b", "2026-06-11"), ("a", "2026-06-10")]),
                )
                .page("https://blog.example.com/a/", article("Alpha"))
                .page("https://blog.example.com/b/", article("Beta"))
                .page("https://blog.example.com/c/", article("Gamma")),
        );
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(web, sink.clone(), Box::new(MemoryStore::new()), "crm", 1);

        for d in 15..=18 {
            pipeline.run(day(d)).await;
        }

        let urls: Vec<String> = sink
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.source_url.clone())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://blog.example.com/a/",
                "https://blog.example.com/b/",
                "https://blog.example.com/c/",
            ]
        );

        let last = pipeline.run(day(19)).await;
        assert_eq!(last.discovered, 0);
    }

    #[tokio::test]
    async fn test_deferred_entry_sharing_a_timestamp_is_not_lost() {
        let web = Arc::new(
            FakeWeb::default()
                .page(LISTING_URL, listing(&[("b", "2026-06-11"), ("a", "2026-06-11")]))
                .page("https://blog.example.com/a/", article("Alpha"))
                .page("https://blog.example.com/b/", article("Beta")),
        );
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(web, sink.clone(), Box::new(MemoryStore::new()), "crm", 1);

        let first = pipeline.run(day(15)).await;
        assert_eq!(first.attempted, 1);
        assert!(first.watermark.unwrap() < Utc.with_ymd_and_hms(2026, 6, 11, 0, 0, 0).unwrap());

        let second = pipeline.run(day(16)).await;
        assert_eq!(second.skipped_processed, 1);
        assert_eq!(second.published.len(), 1);
        assert_eq!(sink.published.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_document() {
        let web = Arc::new(
            FakeWeb::default()
                .page(
                    LISTING_URL,
                    listing(&[("missing", "2026-06-13"), ("boom", "2026-06-12"), ("notitle", "2026-06-11"), ("ok", "2026-06-10")]),
                )
                .page("https://blog.example.com/boom/", article("boom"))
                .page(
                    "https://blog.example.com/notitle/",
                    "<section class=\"gh-content\"><p>x</p></section>".to_string(),
                )
                .page("https://blog.example.com/ok/", article("Fine")),
        );
        let sink = Arc::new(RecordingSink::default());
        let store: Box<dyn KeyValueStore> = Box::new(MemoryStore::new());
        let pipeline = pipeline(web, sink, store, "crm", 10);

        let report = pipeline.run(day(15)).await;
        assert_eq!(report.attempted, 4);
        assert_eq!(report.failed, 3);
        assert_eq!(report.published.len(), 1);
        assert_eq!(report.published[0].source_url, "https://blog.example.com/ok/");
        assert!(pipeline.tracker().is_processed("https://blog.example.com/ok/").await);
        assert!(!pipeline.tracker().is_processed("https://blog.example.com/boom/").await);
        // Failed documents were attempted, so they still count toward the watermark.
        assert_eq!(report.watermark, Some(Utc.with_ymd_and_hms(2026, 6, 13, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_dedup_skips_processed_urls_without_counting_them() {
        let web = Arc::new(
            FakeWeb::default()
                .page(LISTING_URL, listing(&[("a", "2026-06-10"), ("b", "2026-06-09")]))
                .page("https://blog.example.com/a/", article("Alpha"))
                .page("https://blog.example.com/b/", article("Beta")),
        );
        let store = MemoryStore::new();
        let marker = ProcessedMarker {
            url: "https://blog.example.com/a/".to_string(),
            processed_at: day(1),
            path: None,
        };
        CrawlTracker::new(&store, Duration::weeks(2)).mark_processed(&marker).await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(web, sink, Box::new(store), "crm", 10);

        let report = pipeline.run(day(15)).await;
        assert_eq!(report.skipped_processed, 1);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.published[0].source_url, "https://blog.example.com/b/");
        assert_eq!(report.watermark, Some(Utc.with_ymd_and_hms(2026, 6, 9, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_unknown_ai_category_falls_back_to_default() {
        let web = Arc::new(
            FakeWeb::default()
                .page(LISTING_URL, listing(&[("a", "2026-06-10")]))
                .page("https://blog.example.com/a/", article("Alpha")),
        );
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(web, sink, Box::new(MemoryStore::new()), "knitting", 10);

        let report = pipeline.run(day(15)).await;
        assert_eq!(report.published[0].category, Category::General);
        assert_eq!(report.published[0].path, "general/rewritten-alpha.mdx");
    }

    #[tokio::test]
    async fn test_listing_failure_does_not_abort_pass() {
        let web = Arc::new(FakeWeb::default());
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(web, sink, Box::new(MemoryStore::new()), "crm", 10);

        let report = pipeline.run(day(15)).await;
        assert_eq!(report.listing_failures, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(report.watermark, None);
        assert_eq!(report.cutoff, Some(day(15) - Duration::weeks(2)));
    }
}
