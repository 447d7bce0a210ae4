/// Publishing module
///
/// Uploads the composed JPEG to a Facebook page through the Graph API, and
/// offers a cheap credential probe the gatekeeper runs before any paid call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, Credentials};

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Lightweight call proving the publishing credential still works
    async fn check_health(&self) -> Result<()>;

    /// Upload the image with a caption, returning the created post id
    async fn publish(&self, image: Vec<u8>, caption: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhotoResponse {
    id: Option<String>,
    post_id: Option<String>,
}

pub struct FacebookPublisher {
    page_id: String,
    access_token: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl FacebookPublisher {
    pub fn new(config: &Config, credentials: &Credentials) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            page_id: credentials.page_id.clone(),
            access_token: credentials.page_access_token.clone(),
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string())
}

#[async_trait]
impl Publisher for FacebookPublisher {
    async fn check_health(&self) -> Result<()> {
        log::info!("Checking page access token...");

        let response = self
            .http_client
            .get(format!("{}/{}", self.base_url, self.page_id))
            .query(&[("fields", "id,name")])
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to reach the Graph API")?;

        let status = response.status();
        if !status.is_success() {
            let text = error_body(response).await;
            anyhow::bail!("Page token check failed (status {}): {}", status, text);
        }

        let page: PageInfo = response
            .json()
            .await
            .context("Failed to parse page info")?;

        let id = page.id.context("Page info response carried no id")?;
        log::info!(
            "Page token valid for {} ({})",
            page.name.as_deref().unwrap_or("unnamed page"),
            id
        );
        Ok(())
    }

    async fn publish(&self, image: Vec<u8>, caption: &str) -> Result<String> {
        log::info!("Uploading {} byte image to page {}", image.len(), self.page_id);

        let photo = Part::bytes(image)
            .file_name("post.jpg")
            .mime_str("image/jpeg")
            .context("Failed to build upload part")?;

        let form = Form::new()
            .part("source", photo)
            .text("caption", caption.to_string())
            .text("published", "true");

        let response = self
            .http_client
            .post(format!("{}/{}/photos", self.base_url, self.page_id))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to send photo upload")?;

        let status = response.status();
        if !status.is_success() {
            let text = error_body(response).await;
            anyhow::bail!("Graph API upload failed (status {}): {}", status, text);
        }

        let created: PhotoResponse = response
            .json()
            .await
            .context("Failed to parse upload response")?;

        let post_id = created
            .post_id
            .or(created.id)
            .context("Upload response carried no post id")?;

        log::info!("Published post {}", post_id);
        Ok(post_id)
    }
}

/// Writes the composed image to a local file instead of uploading
pub struct DryRunPublisher {
    output: PathBuf,
}

impl DryRunPublisher {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn check_health(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, image: Vec<u8>, caption: &str) -> Result<String> {
        tokio::fs::write(&self.output, &image)
            .await
            .with_context(|| format!("Failed to write preview {}", self.output.display()))?;

        log::info!(
            "[dry run] Not uploading; preview written to {} (caption: {})",
            self.output.display(),
            caption
        );
        Ok("dry-run".to_string())
    }
}
