use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::{Category, Document};

/// Opaque prompt-in, text-out AI call.
#[async_trait]
pub trait TextTransform: Send + Sync {
    async fn transform(&self, prompt: &str) -> Result<String, PipelineError>;
}

#[derive(Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<Content>,
}

#[derive(Deserialize)]
struct Content {
    text: String,
}

pub struct ClaudeRewriter {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeRewriter {
    pub fn new(api_key: String, model: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model,
            max_tokens: 4096,
        })
    }
}

#[async_trait]
impl TextTransform for ClaudeRewriter {
    async fn transform(&self, prompt: &str) -> Result<String, PipelineError> {
        let request = ClaudeRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Generation(format!("failed to send request to Claude API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(PipelineError::Generation(format!(
                "Claude API error {}: {}",
                status, error_text
            )));
        }

        let claude_response = response
            .json::<ClaudeResponse>()
            .await
            .map_err(|e| PipelineError::Generation(format!("failed to parse Claude API response: {}", e)))?;

        let text = claude_response
            .content
            .first()
            .map(|c| c.text.trim())
            .unwrap_or("");

        if text.is_empty() {
            return Err(PipelineError::Generation("empty response".to_string()));
        }

        Ok(strip_code_fence(text).to_string())
    }
}

/// Wrap the formatted article in the rewrite instructions. The model is asked
/// for a front-matter block followed by an MDX body using the blog layout.
pub fn build_rewrite_prompt(formatted: &str, document: &Document, date: DateTime<Utc>) -> String {
    let date = date.format("%B %d, %Y");
    let slug = document.category().slug();
    let names: Vec<&str> = Category::ALL.iter().map(|c| c.name()).collect();
    let names = format!("{:?}", names);

    format!(
        r#"Regenerate a blog post based on the following content:

{formatted}

IMPORTANT: Return ONLY the blog content. Do NOT wrap your response in markdown code blocks. Start directly with the frontmatter (---).

Use this EXACT format structure:

---
title: "A new title based on {title}"
description: "A one-sentence description of the rewritten post"
date: "{date}"
category: {slug}
readTime: "Estimated from the content length, e.g. 5 min read"
author: "Voltade Team"
image: "{slug}/the-title-you-assigned-joined-by-dashes"
tags: Choose more than one relevant category from {names} as an array, e.g. ["Product Updates", "CRM"]
showSidebar: false
showOutline: true
---

import {{ BlogLayout }} from "../../layouts/BlogpageLayout.tsx";

export const fm = {{
    title: "Same as the title you assigned to the post",
    description: "Same as the description you assigned to the post",
    date: "{date}",
    category: "{slug}",
    readTime: "Same as the read time you assigned to the post",
    author: "Voltade Team",
    image: "Same as the image you assigned to the post",
    tags: "Same as the tags you assigned to the post",
}};

<BlogLayout frontmatter={{fm}}>

[The blog content goes here ...]

</BlogLayout>

If the content fits a different category better, set `category:` to the slug of one of: {slugs}.

REQUIREMENTS:
1. Rewrite the blog post based on the provided content comprehensively
2. Include success optimization tips
3. Make it actionable and strategic
4. DO NOT wrap in markdown code blocks
5. Wrap the content with the frontmatter and layout"#,
        formatted = formatted,
        title = document.title(),
        date = date,
        slug = slug,
        names = names,
        slugs = Category::ALL
            .iter()
            .map(|c| c.slug())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Drop a surrounding ``` fence if the model added one anyway.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. "mdx") on the opening fence line.
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

/// Key/value pairs of the leading `---` block, in order.
pub fn front_matter(text: &str) -> Vec<(String, String)> {
    let mut lines = text.trim_start().lines();
    if lines.next().map(str::trim) != Some("---") {
        return Vec::new();
    }

    lines
        .take_while(|line| line.trim() != "---")
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            if key.is_empty() || key.contains(' ') {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Category the model chose in its front matter. `None` when it gave none;
/// a name outside the known set maps to `default`.
pub fn classify_category(generated: &str, default: Category) -> Option<Category> {
    front_matter(generated)
        .into_iter()
        .find(|(key, _)| key == "category")
        .map(|(_, value)| Category::classify_or(&value, default))
}

/// `title:` from the front matter, unquoted.
pub fn generated_title(generated: &str) -> Option<String> {
    front_matter(generated)
        .into_iter()
        .find(|(key, _)| key == "title")
        .map(|(_, value)| value.trim_matches('"').trim().to_string())
        .filter(|title| !title.is_empty())
}
