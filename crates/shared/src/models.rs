use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::formatter::{self, FormatOptions};

/// A single piece of article body content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Paragraph { text: String },
    List { items: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionKind {
    Intro,
    Heading(u8),
}

/// A contiguous run of content under one heading, or the untitled lead-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub kind: SectionKind,
    pub heading: Option<String>,
    pub content: Vec<ContentItem>,
}

impl Section {
    pub fn intro() -> Self {
        Self {
            kind: SectionKind::Intro,
            heading: None,
            content: Vec::new(),
        }
    }

    /// Levels outside 1..=6 are clamped.
    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self {
            kind: SectionKind::Heading(level.clamp(1, 6)),
            heading: Some(text.into()),
            content: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Categories the republished posts are filed under.
///
/// Each category has three spellings: the display name the AI sees and
/// answers with, the slug used for output paths, and the tag the source blog
/// uses in its listing URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    ProductUpdates,
    Grants,
    Crm,
    SalesMarketing,
    ProductSupport,
    General,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::ProductUpdates,
        Category::Grants,
        Category::Crm,
        Category::SalesMarketing,
        Category::ProductSupport,
        Category::General,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::ProductUpdates => "Product Updates",
            Category::Grants => "Grants",
            Category::Crm => "CRM",
            Category::SalesMarketing => "Sales & Marketing",
            Category::ProductSupport => "Product Support",
            Category::General => "General",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Category::ProductUpdates => "product-updates",
            Category::Grants => "grants",
            Category::Crm => "crm",
            Category::SalesMarketing => "sales-marketing",
            Category::ProductSupport => "product-support",
            Category::General => "general",
        }
    }

    pub fn source_tag(&self) -> &'static str {
        match self {
            Category::ProductUpdates => "product-update",
            Category::Grants => "grant",
            Category::Crm => "crm",
            Category::SalesMarketing => "sales-and-marketing",
            Category::ProductSupport => "product-support",
            Category::General => "general",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.slug() == slug)
    }

    pub fn from_source_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.source_tag() == tag)
    }

    /// Looks up a category from whatever spelling the AI returned: display
    /// name (case-insensitive), slug or source tag.
    pub fn parse_loose(value: &str) -> Option<Self> {
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(value))
            .or_else(|| Self::from_slug(&value.to_lowercase()))
            .or_else(|| Self::from_source_tag(&value.to_lowercase()))
    }

    /// Like `parse_loose`, but unknown values map to `default`.
    pub fn classify_or(value: &str, default: Category) -> Self {
        Self::parse_loose(value).unwrap_or(default)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A scraped article. Immutable after extraction apart from `set_category`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    title: String,
    description: Option<String>,
    url: String,
    sections: Vec<Section>,
    category: Category,
}

impl Document {
    pub fn new(
        title: impl Into<String>,
        description: Option<String>,
        url: impl Into<String>,
        sections: Vec<Section>,
        category: Category,
    ) -> Self {
        Self {
            title: title.into(),
            description,
            url: url.into(),
            sections,
            category,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Overwrites the category once the AI has classified the content.
    pub fn set_category(&mut self, category: Category) {
        self.category = category;
    }

    /// Token count of the formatted prompt for this document.
    pub fn word_count(&self) -> usize {
        formatter::word_count(&formatter::format(self, &FormatOptions::default()))
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }
}

/// A (url, last-modified) pair discovered from a sitemap or listing page.
/// `last_modified` is `None` when the listing gave no usable date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub url: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ListingEntry {
    pub fn new(url: impl Into<String>, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            url: url.into(),
            last_modified,
        }
    }
}
