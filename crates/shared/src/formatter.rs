use crate::models::{ContentItem, Document, SectionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// Emit lists that appear before the first heading. The legacy prompt
    /// layout dropped them.
    pub include_intro_lists: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            include_intro_lists: true,
        }
    }
}

impl FormatOptions {
    pub fn legacy() -> Self {
        Self {
            include_intro_lists: false,
        }
    }
}

/// Flatten a document into the plain-text layout sent to the rewriter.
pub fn format(document: &Document, options: &FormatOptions) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("Title: {}", document.title()));
    if let Some(description) = document.description() {
        lines.push(format!("Description: {}", description));
    }
    lines.push(format!("Category: {}", document.category().source_tag()));
    lines.push(String::new());

    for section in document.sections() {
        match section.kind {
            SectionKind::Intro => {
                lines.push("Introduction:".to_string());
                for item in &section.content {
                    match item {
                        ContentItem::Paragraph { text } => lines.push(format!("- {}", text)),
                        ContentItem::List { items } if options.include_intro_lists => {
                            push_list(&mut lines, items);
                        }
                        ContentItem::List { .. } => {}
                    }
                }
            }
            SectionKind::Heading(_) => {
                lines.push(String::new());
                lines.push(section.heading.clone().unwrap_or_default());
                for item in &section.content {
                    match item {
                        ContentItem::Paragraph { text } => lines.push(format!("- {}", text)),
                        ContentItem::List { items } => push_list(&mut lines, items),
                    }
                }
            }
        }
    }

    lines.join("\n")
}

fn push_list(lines: &mut Vec<String>, items: &[String]) {
    lines.push("List items:".to_string());
    lines.extend(items.iter().map(|item| format!("  • {}", item)));
}

/// Whitespace-delimited token count. This is the word count used everywhere.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Section};

    fn sample_document() -> Document {
        let mut intro = Section::intro();
        intro.content.push(ContentItem::Paragraph {
            text: "Opening line".to_string(),
        });
        intro.content.push(ContentItem::List {
            items: vec!["one".to_string(), "two".to_string()],
        });

        let mut body = Section::heading(2, "Why it matters");
        body.content.push(ContentItem::Paragraph {
            text: "Because.".to_string(),
        });
        body.content.push(ContentItem::List {
            items: vec!["A".to_string()],
        });

        Document::new(
            "Grant guide",
            Some("How to apply".to_string()),
            "/grant-guide/",
            vec![intro, body],
            Category::Grants,
        )
    }

    #[test]
    fn test_format_full_layout() {
        let text = format(&sample_document(), &FormatOptions::default());
        let expected = "Title: Grant guide\n\
                        Description: How to apply\n\
                        Category: grant\n\
                        \n\
                        Introduction:\n\
                        - Opening line\n\
                        List items:\n  • one\n  • two\n\
                        \n\
                        Why it matters\n\
                        - Because.\n\
                        List items:\n  • A";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_legacy_layout_drops_intro_lists() {
        let text = format(&sample_document(), &FormatOptions::legacy());
        assert!(!text.contains("  • one"));
        assert!(text.contains("  • A"));
    }

    #[test]
    fn test_description_line_omitted_when_absent() {
        let doc = Document::new("Only title", None, "/x/", Vec::new(), Category::Crm);
        let text = format(&doc, &FormatOptions::default());
        assert_eq!(text, "Title: Only title\nCategory: crm\n");
    }

    #[test]
    fn test_format_is_deterministic() {
        let doc = sample_document();
        let options = FormatOptions::default();
        assert_eq!(format(&doc, &options), format(&doc, &options));
    }

    #[test]
    fn test_document_word_count_matches_formatted_tokens() {
        let doc = sample_document();
        let text = format(&doc, &FormatOptions::default());
        assert_eq!(doc.word_count(), text.split_whitespace().count());
        assert_eq!(doc.word_count(), 28);
    }
}
