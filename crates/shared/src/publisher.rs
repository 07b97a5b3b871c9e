use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::path::PathBuf;

use crate::models::Category;

/// What gets handed to a publish sink for one rewritten post.
#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    pub title: String,
    pub content: String,
    pub metadata: PostMetadata,
    pub source_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostMetadata {
    pub category: Category,
    pub source_title: String,
    pub word_count: usize,
    pub section_count: usize,
    pub generated_word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { path: String, filename: String },
    Failed { error: String },
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

#[async_trait]
pub trait PublishSink: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> PublishOutcome;
}

/// Lowercase ASCII words joined by `-`, e.g. "CRM: 5 Tips!" -> "crm-5-tips".
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.chars().take(80).collect::<String>().trim_end_matches('-').to_string()
    }
}

/// `<category-slug>/<title-slug>.mdx`
pub fn post_path(category: Category, title: &str) -> (String, String) {
    let filename = format!("{}.mdx", slugify(title));
    let path = format!("{}/{}", category.slug(), filename);
    (path, filename)
}

/// Writes posts under a local directory, one folder per category.
pub struct DirectoryPublisher {
    root: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PublishSink for DirectoryPublisher {
    async fn publish(&self, request: &PublishRequest) -> PublishOutcome {
        let (path, filename) = post_path(request.metadata.category, &request.title);
        let target = self.root.join(&path);

        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return PublishOutcome::Failed {
                    error: format!("failed to create {}: {}", parent.display(), e),
                };
            }
        }

        match tokio::fs::write(&target, &request.content).await {
            Ok(()) => PublishOutcome::Published {
                path: target.display().to_string(),
                filename,
            },
            Err(e) => PublishOutcome::Failed {
                error: format!("failed to write {}: {}", target.display(), e),
            },
        }
    }
}

#[derive(Serialize)]
struct DispatchRequest<'a> {
    event_type: &'a str,
    client_payload: DispatchPayload<'a>,
}

#[derive(Serialize)]
struct DispatchPayload<'a> {
    path: &'a str,
    filename: &'a str,
    #[serde(flatten)]
    post: &'a PublishRequest,
}

/// Hands posts to another repository through a GitHub `repository_dispatch`
/// event; a workflow there commits the file.
pub struct GithubDispatchPublisher {
    client: Client,
    token: String,
    repo: String,
    event_type: String,
}

impl GithubDispatchPublisher {
    pub fn new(token: String, repo: String, event_type: String) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("blog-relay")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            token,
            repo,
            event_type,
        })
    }
}

#[async_trait]
impl PublishSink for GithubDispatchPublisher {
    async fn publish(&self, request: &PublishRequest) -> PublishOutcome {
        let (path, filename) = post_path(request.metadata.category, &request.title);
        let body = DispatchRequest {
            event_type: &self.event_type,
            client_payload: DispatchPayload {
                path: &path,
                filename: &filename,
                post: request,
            },
        };

        let url = format!("https://api.github.com/repos/{}/dispatches", self.repo);
        let response = match self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return PublishOutcome::Failed {
                    error: format!("dispatch request failed: {}", e),
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            PublishOutcome::Published { path, filename }
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            PublishOutcome::Failed {
                error: format!("GitHub API returned {}: {}", status, error_text),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str) -> PublishRequest {
        PublishRequest {
            title: title.to_string(),
            content: "---\ntitle: x\n---\nbody".to_string(),
            metadata: PostMetadata {
                category: Category::Crm,
                source_title: "Original".to_string(),
                word_count: 10,
                section_count: 1,
                generated_word_count: 4,
            },
            source_url: "https://blog.example.com/original/".to_string(),
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("CRM: 5 Tips for Q3!"), "crm-5-tips-for-q3");
        assert_eq!(slugify("  --Hello   World--  "), "hello-world");
        assert_eq!(slugify("¿¡!"), "untitled");
        assert!(slugify(&"word ".repeat(40)).len() <= 80);
    }

    #[test]
    fn test_post_path_uses_category_slug() {
        let (path, filename) = post_path(Category::SalesMarketing, "Big Launch");
        assert_eq!(path, "sales-marketing/big-launch.mdx");
        assert_eq!(filename, "big-launch.mdx");
    }

    #[tokio::test]
    async fn test_directory_publisher_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = DirectoryPublisher::new(dir.path());

        let outcome = publisher.publish(&request("Pipeline Hygiene")).await;
        match outcome {
            PublishOutcome::Published { path, filename } => {
                assert_eq!(filename, "pipeline-hygiene.mdx");
                let written = std::fs::read_to_string(path).unwrap();
                assert!(written.ends_with("body"));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_payload_shape() {
        let post = request("T");
        let body = DispatchRequest {
            event_type: "publish-post",
            client_payload: DispatchPayload {
                path: "crm/t.mdx",
                filename: "t.mdx",
                post: &post,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["event_type"], "publish-post");
        assert_eq!(json["client_payload"]["path"], "crm/t.mdx");
        assert_eq!(json["client_payload"]["source_url"], "https://blog.example.com/original/");
        assert_eq!(json["client_payload"]["metadata"]["category"], "crm");
    }
}
