use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use shared::{
    Category, ClaudeRewriter, Config, ContentExtractor, CrawlTracker, DirectoryPublisher,
    FileStore, FormatOptions, GithubDispatchPublisher, HttpFetcher, KeyValueStore, MemoryStore,
    Pipeline, PipelineOptions, PublishSink, PublishTarget,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relay-posts")]
#[command(about = "Crawl new blog posts, rewrite them with Claude and publish the results")]
struct Args {
    /// Only crawl this source tag (e.g. crm, grant)
    #[arg(short, long)]
    tag: Option<String>,

    /// Maximum number of posts to process this run
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Keep crawl state in memory only (watermark and processed URLs are not saved)
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shared=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;

    if let Some(tag) = &args.tag {
        let category = Category::from_source_tag(tag)
            .ok_or_else(|| anyhow::anyhow!("Unknown tag: {}", tag))?;
        config.tags = vec![category];
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size.max(1);
    }

    let sources = config.listing_sources()?;
    println!("🔍 Crawling {} listing(s) on {}", sources.len(), config.blog_base_url);

    let store: Box<dyn KeyValueStore> = if args.ephemeral {
        println!("  (ephemeral run: crawl state will not be saved)");
        Box::new(MemoryStore::new())
    } else {
        println!("  State file: {}", config.state_path.display());
        Box::new(FileStore::new(config.state_path.clone()))
    };

    let publisher: Box<dyn PublishSink> = match &config.publish_target {
        PublishTarget::Directory(dir) => {
            println!("  Publishing to directory: {}", dir.display());
            Box::new(DirectoryPublisher::new(dir.clone()))
        }
        PublishTarget::GithubDispatch {
            token,
            repo,
            event_type,
        } => {
            println!("  Publishing via repository dispatch to {}", repo);
            Box::new(GithubDispatchPublisher::new(
                token.clone(),
                repo.clone(),
                event_type.clone(),
            )?)
        }
    };

    let extractor = ContentExtractor::new(&config.article_selectors)
        .context("Invalid article selectors")?;

    let pipeline = Pipeline::new(
        Box::new(HttpFetcher::new()?),
        Box::new(ClaudeRewriter::new(
            config.anthropic_api_key.clone(),
            config.anthropic_model.clone(),
        )?),
        publisher,
        CrawlTracker::new(store, config.fallback_window),
        extractor,
        PipelineOptions {
            sources,
            listing_selectors: config.listing_selectors.clone(),
            batch_size: config.batch_size,
            format: FormatOptions {
                include_intro_lists: config.include_intro_lists,
            },
            watermark_enabled: config.watermark_enabled,
            dedup_enabled: config.dedup_enabled,
            default_category: config.default_category,
        },
    );

    let report = pipeline.run(Utc::now()).await;

    println!("\n📊 Run summary:");
    if let Some(cutoff) = report.cutoff {
        println!("   Cutoff: {}", cutoff.to_rfc3339());
    }
    println!("   Discovered: {}", report.discovered);
    println!("   Already processed: {}", report.skipped_processed);
    println!("   Attempted: {}", report.attempted);
    println!("   Failed: {}", report.failed);
    if report.deferred > 0 {
        println!("   Deferred to next run: {}", report.deferred);
    }
    if report.listing_failures > 0 {
        println!("   ⚠ Listings that could not be read: {}", report.listing_failures);
    }

    if !report.published.is_empty() {
        println!("\n✅ Published {} post(s):", report.published.len());
        for post in &report.published {
            println!("  ✓ {} [{}]", post.filename, post.category.name());
            println!("    Source: {}", post.source_url);
            println!("    Path: {}", post.path);
        }
    }

    match report.watermark {
        Some(watermark) => println!("\n🕒 Watermark advanced to {}", watermark.to_rfc3339()),
        None => println!("\n🕒 Watermark unchanged"),
    }

    Ok(())
}
