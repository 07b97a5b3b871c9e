use anyhow::{Context, Result};
use chrono::Duration;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

use crate::extractor::ArticleSelectors;
use crate::listing::ListingSelectors;
use crate::models::Category;

const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
const DEFAULT_TAGS: &str = "sales-and-marketing,crm,product-update,grant,product-support";

/// Where candidate posts are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingMode {
    /// One HTML listing page per tag, `<base>/tag/<tag>/`.
    Tags,
    /// A single XML sitemap.
    Sitemap,
}

impl FromStr for ListingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tags" | "tag" => Ok(ListingMode::Tags),
            "sitemap" => Ok(ListingMode::Sitemap),
            other => anyhow::bail!("Invalid LISTING_MODE: {}. Use 'tags' or 'sitemap'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PublishTarget {
    Directory(PathBuf),
    GithubDispatch {
        token: String,
        repo: String,
        event_type: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub blog_base_url: Url,
    pub listing_mode: ListingMode,
    pub tags: Vec<Category>,
    pub sitemap_path: String,
    pub article_selectors: ArticleSelectors,
    pub listing_selectors: ListingSelectors,
    pub fallback_window: Duration,
    pub batch_size: usize,
    pub watermark_enabled: bool,
    pub dedup_enabled: bool,
    pub include_intro_lists: bool,
    pub default_category: Category,
    pub state_path: PathBuf,
    pub publish_target: PublishTarget,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        let anthropic_api_key = env::var("ANTHROPIC_API_KEY").context(
            "ANTHROPIC_API_KEY not found.\n\n\
            To fix this, create ~/.config/blog-relay/.env with:\n  \
            ANTHROPIC_API_KEY=your_key_here\n  \
            BLOG_BASE_URL=https://blog.example.com\n\n\
            Get your Anthropic API key from: https://console.anthropic.com/settings/keys",
        )?;

        Self::from_lookup(anthropic_api_key, |key| env::var(key).ok())
    }

    /// Everything except the API key, read through `lookup` so tests can
    /// feed a map instead of the process environment.
    pub fn from_lookup<F>(anthropic_api_key: String, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base = var("BLOG_BASE_URL").context(
            "BLOG_BASE_URL not found. Set it to the root of the blog to crawl, e.g. https://blog.example.com",
        )?;
        let blog_base_url = Url::parse(&ensure_trailing_slash(&base))
            .with_context(|| format!("BLOG_BASE_URL is not a valid URL: {}", base))?;

        let listing_mode = var("LISTING_MODE")
            .map(|m| m.parse::<ListingMode>())
            .transpose()?
            .unwrap_or(ListingMode::Tags);

        let tags = var("BLOG_TAGS")
            .unwrap_or_else(|| DEFAULT_TAGS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| {
                Category::from_source_tag(t)
                    .with_context(|| format!("Unknown tag in BLOG_TAGS: {}", t))
            })
            .collect::<Result<Vec<_>>>()?;

        let default_category = match var("DEFAULT_CATEGORY") {
            Some(slug) => Category::from_slug(&slug).with_context(|| {
                let known: Vec<&str> = Category::ALL.iter().map(|c| c.slug()).collect();
                format!("Unknown DEFAULT_CATEGORY: {}. Use one of: {}", slug, known.join(", "))
            })?,
            None => Category::General,
        };

        let defaults = ArticleSelectors::default();
        let article_selectors = ArticleSelectors {
            title: var("TITLE_SELECTOR").unwrap_or(defaults.title),
            description: var("DESCRIPTION_SELECTOR").unwrap_or(defaults.description),
            content_root: var("CONTENT_SELECTOR").unwrap_or(defaults.content_root),
        };

        let defaults = ListingSelectors::default();
        let listing_selectors = ListingSelectors {
            card: var("CARD_SELECTOR").unwrap_or(defaults.card),
            link: var("CARD_LINK_SELECTOR").unwrap_or(defaults.link),
            time: var("CARD_TIME_SELECTOR").unwrap_or(defaults.time),
        };

        let fallback_days: i64 = parse_var(&var, "FALLBACK_WINDOW_DAYS", 14)?;
        let batch_size: usize = parse_var(&var, "BATCH_SIZE", 5)?;
        if batch_size == 0 {
            anyhow::bail!("BATCH_SIZE must be at least 1");
        }

        let state_path = match var("STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?.join("state"),
        }
        .join("crawl-state.json");

        let publish_target = match (var("GITHUB_TOKEN"), var("GITHUB_REPO")) {
            (Some(token), Some(repo)) => PublishTarget::GithubDispatch {
                token,
                repo,
                event_type: var("GITHUB_EVENT_TYPE").unwrap_or_else(|| "publish-post".to_string()),
            },
            (Some(_), None) => anyhow::bail!("GITHUB_TOKEN is set but GITHUB_REPO is missing"),
            _ => PublishTarget::Directory(match var("PUBLISH_DIR") {
                Some(dir) => PathBuf::from(dir),
                None => default_data_dir()?.join("generated"),
            }),
        };

        Ok(Self {
            anthropic_api_key,
            anthropic_model: var("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            blog_base_url,
            listing_mode,
            tags,
            sitemap_path: var("SITEMAP_PATH").unwrap_or_else(|| "sitemap-posts.xml".to_string()),
            article_selectors,
            listing_selectors,
            fallback_window: Duration::days(fallback_days),
            batch_size,
            watermark_enabled: parse_var(&var, "WATERMARK_ENABLED", true)?,
            dedup_enabled: parse_var(&var, "DEDUP_ENABLED", true)?,
            include_intro_lists: parse_var(&var, "INCLUDE_INTRO_LISTS", true)?,
            default_category,
            state_path,
            publish_target,
        })
    }

    /// Listing URLs to crawl, each with the category its posts start in.
    pub fn listing_sources(&self) -> Result<Vec<(Url, Category)>> {
        match self.listing_mode {
            ListingMode::Tags => self
                .tags
                .iter()
                .map(|tag| {
                    let url = self
                        .blog_base_url
                        .join(&format!("tag/{}/", tag.source_tag()))
                        .with_context(|| format!("Failed to build listing URL for tag {}", tag.source_tag()))?;
                    Ok((url, *tag))
                })
                .collect(),
            ListingMode::Sitemap => {
                let url = self
                    .blog_base_url
                    .join(&self.sitemap_path)
                    .with_context(|| format!("Invalid SITEMAP_PATH: {}", self.sitemap_path))?;
                Ok(vec![(url, self.default_category)])
            }
        }
    }

    fn try_load_dotenv() {
        // Try locations in order of preference:

        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/blog-relay/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("blog-relay").join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }

        // If none found, that's okay - environment variables might be set system-wide
    }
}

/// Local data directory for state and generated posts
pub fn default_data_dir() -> Result<PathBuf> {
    Ok(dirs::data_local_dir()
        .context("Could not determine local data directory")?
        .join("blog-relay"))
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {} ({})", key, raw, e)),
        None => Ok(default),
    }
}

fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}
