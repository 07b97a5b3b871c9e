use anyhow::{Context, Result};
use clap::Parser;
use shared::formatter::{self, FormatOptions};
use shared::{ArticleSelectors, Category, ContentExtractor, Fetch, HttpFetcher};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "preview-post")]
#[command(about = "Extract one blog post and print the prompt that would be sent for rewriting")]
struct Args {
    /// Post URL to fetch
    #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
    url: Option<String>,

    /// Read the post HTML from a local file instead
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Source tag the post is listed under (e.g. crm, grant)
    #[arg(short, long, default_value = "general")]
    tag: String,

    /// Drop lists before the first heading, as the legacy prompt did
    #[arg(long)]
    legacy: bool,

    /// Print the extracted document as JSON instead of the prompt
    #[arg(long)]
    json: bool,

    #[arg(long)]
    title_selector: Option<String>,

    #[arg(long)]
    description_selector: Option<String>,

    #[arg(long)]
    content_selector: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let category = Category::from_source_tag(&args.tag)
        .ok_or_else(|| anyhow::anyhow!("Unknown tag: {}", args.tag))?;

    let defaults = ArticleSelectors::default();
    let selectors = ArticleSelectors {
        title: args.title_selector.unwrap_or(defaults.title),
        description: args.description_selector.unwrap_or(defaults.description),
        content_root: args.content_selector.unwrap_or(defaults.content_root),
    };
    let extractor = ContentExtractor::new(&selectors).context("Invalid selectors")?;

    let (html, source) = match (&args.url, &args.file) {
        (_, Some(path)) => {
            let html = fs::read_to_string(path)
                .with_context(|| format!("Failed to read HTML file: {}", path.display()))?;
            (html, path.display().to_string())
        }
        (Some(url), None) => {
            let html = HttpFetcher::new()?
                .fetch(url)
                .await
                .with_context(|| format!("Failed to fetch {}", url))?;
            (html, url.clone())
        }
        (None, None) => anyhow::bail!("Provide --url or --file"),
    };

    let document = extractor
        .extract(&html, &source, category)
        .with_context(|| format!("Failed to extract post from {}", source))?;

    if args.json {
        let json = serde_json::to_string_pretty(&document).context("Failed to serialize document")?;
        println!("{}", json);
        return Ok(());
    }

    let options = if args.legacy {
        FormatOptions::legacy()
    } else {
        FormatOptions::default()
    };
    let prompt = formatter::format(&document, &options);

    println!("{}", prompt);
    eprintln!("\n📊 {}", document.title());
    eprintln!("   Word count: {}", formatter::word_count(&prompt));
    eprintln!("   Sections: {}", document.section_count());

    Ok(())
}
