use scraper::{ElementRef, Html, Selector};

use crate::error::ExtractError;
use crate::models::{Category, ContentItem, Document, Section};

/// CSS selectors locating the parts of an article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSelectors {
    pub title: String,
    pub description: String,
    pub content_root: String,
}

impl Default for ArticleSelectors {
    fn default() -> Self {
        Self {
            title: "h1.article-title".to_string(),
            description: "p.article-excerpt".to_string(),
            content_root: "section.gh-content".to_string(),
        }
    }
}

/// A content node in document order, before grouping into sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph(String),
    List(Vec<String>),
}

const BLOCK_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6, ul, ol";

pub struct ContentExtractor {
    title: Selector,
    description: Selector,
    content_root: Selector,
    blocks: Selector,
}

impl ContentExtractor {
    pub fn new(selectors: &ArticleSelectors) -> Result<Self, ExtractError> {
        Ok(Self {
            title: parse_selector(&selectors.title)?,
            description: parse_selector(&selectors.description)?,
            content_root: parse_selector(&selectors.content_root)?,
            blocks: parse_selector(BLOCK_SELECTOR)?,
        })
    }

    /// Parse an article page into a `Document`.
    pub fn extract(&self, html: &str, url: &str, category: Category) -> Result<Document, ExtractError> {
        let page = Html::parse_document(html);

        let title = page
            .select(&self.title)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
            .ok_or(ExtractError::MissingTitle)?;

        let description = page
            .select(&self.description)
            .next()
            .map(element_text)
            .filter(|d| !d.is_empty());

        let root = page
            .select(&self.content_root)
            .next()
            .ok_or(ExtractError::MissingContent)?;

        let blocks = self.collect_blocks(root);
        let sections = assemble_sections(blocks);

        Ok(Document::new(title, description, url, sections, category))
    }

    fn collect_blocks(&self, root: ElementRef<'_>) -> Vec<Block> {
        root.select(&self.blocks)
            .filter(|el| el.id() != root.id() && !inside_list(*el, root))
            .filter_map(|el| {
                let name = el.value().name();
                match name {
                    "p" => Some(Block::Paragraph(element_text(el))),
                    "ul" | "ol" => Some(Block::List(list_items(el))),
                    _ => heading_level(name).map(|level| Block::Heading {
                        level,
                        text: element_text(el),
                    }),
                }
            })
            .collect()
    }
}

/// Group blocks into sections. Only sections with content are kept, and
/// empty headings, paragraphs and lists are ignored.
pub fn assemble_sections(blocks: Vec<Block>) -> Vec<Section> {
    let (mut sections, current) = blocks.into_iter().fold(
        (Vec::new(), Section::intro()),
        |(mut sections, mut current), block| {
            match block {
                Block::Heading { level, text } if !text.is_empty() => {
                    if !current.is_empty() {
                        sections.push(current);
                    }
                    return (sections, Section::heading(level, text));
                }
                Block::Heading { .. } => {}
                Block::Paragraph(text) if !text.is_empty() => {
                    current.content.push(ContentItem::Paragraph { text });
                }
                Block::Paragraph(_) => {}
                Block::List(items) => {
                    let items: Vec<String> = items.into_iter().filter(|i| !i.is_empty()).collect();
                    if !items.is_empty() {
                        current.content.push(ContentItem::List { items });
                    }
                }
            }
            (sections, current)
        },
    );

    if !current.is_empty() {
        sections.push(current);
    }
    sections
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn heading_level(name: &str) -> Option<u8> {
    let digits = name.strip_prefix('h')?;
    let level: u8 = digits.parse().ok()?;
    Some(level.clamp(1, 6))
}

/// True when `el` sits inside a list that is itself below `root`.
fn inside_list(el: ElementRef<'_>, root: ElementRef<'_>) -> bool {
    el.ancestors()
        .take_while(|node| node.id() != root.id())
        .filter_map(ElementRef::wrap)
        .any(|ancestor| matches!(ancestor.value().name(), "ul" | "ol"))
}

/// Trimmed text of each `li` child. Nested lists fold into their item's text.
fn list_items(list: ElementRef<'_>) -> Vec<String> {
    list.children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "li")
        .map(element_text)
        .collect()
}
