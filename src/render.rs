/// Image generation module
///
/// Turns a finished natural-language prompt into encoded image bytes, either
/// through the OpenAI images endpoint or, in dry-run mode, a local stand-in
/// that never touches the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{ImageBuffer, ImageFormat, Rgb};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

use crate::config::Config;

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate an image for `prompt`, returning encoded bytes (PNG or JPEG)
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct OpenAIImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIImageResponse {
    data: Vec<OpenAIImageData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIImageData {
    b64_json: Option<String>,
    url: Option<String>,
}

pub struct OpenAIImageGenerator {
    api_key: String,
    model: String,
    size: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl OpenAIImageGenerator {
    pub fn new(config: &Config, api_key: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key: api_key.to_string(),
            model: config.image_model.clone(),
            size: config.image_size.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to download generated image")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Image download failed (status {})", status);
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read generated image body")?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageGenerator for OpenAIImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        log::info!("Requesting image from {} ({})", self.model, self.size);
        log::debug!("Image prompt: {}", prompt);

        let request = OpenAIImageRequest {
            model: &self.model,
            prompt,
            size: &self.size,
            n: 1,
        };

        let response = self
            .http_client
            .post(format!("{}/images/generations", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to send image generation request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            anyhow::bail!("OpenAI API error (status {}): {}", status, error_text);
        }

        let response: OpenAIImageResponse = response
            .json()
            .await
            .context("Failed to parse image generation response")?;

        let image = response
            .data
            .into_iter()
            .next()
            .context("No image returned")?;

        let bytes = match (image.b64_json, image.url) {
            (Some(b64), _) => BASE64
                .decode(b64.trim())
                .context("Image payload is not valid base64")?,
            (None, Some(url)) => self.download(&url).await?,
            (None, None) => anyhow::bail!("Image response carried neither b64_json nor url"),
        };

        log::info!("Image generated ({} bytes)", bytes.len());
        Ok(bytes)
    }
}

/// Local gradient image used in dry-run mode; free and offline
pub struct DryRunImageGenerator {
    width: u32,
    height: u32,
}

impl DryRunImageGenerator {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a "WIDTHxHEIGHT" size, falling back to 1024x1536
    pub fn from_size(size: &str) -> Self {
        let parsed = size
            .split_once('x')
            .and_then(|(w, h)| Some((w.trim().parse::<u32>().ok()?, h.trim().parse::<u32>().ok()?)))
            .filter(|(w, h): &(u32, u32)| *w > 0 && *h > 0);

        match parsed {
            Some((width, height)) => Self::new(width, height),
            None => Self::new(1024, 1536),
        }
    }
}

#[async_trait]
impl ImageGenerator for DryRunImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        log::info!("[dry run] Skipping paid image generation");
        log::debug!("[dry run] Prompt would have been: {}", prompt);

        let height = self.height.max(1);
        let image = ImageBuffer::from_fn(self.width, self.height, |_, y| {
            let t = y as f32 / height as f32;
            Rgb([
                (30.0 + 60.0 * t) as u8,
                (40.0 + 50.0 * t) as u8,
                (90.0 + 80.0 * t) as u8,
            ])
        });

        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, ImageFormat::Png)
            .context("Failed to encode dry-run image")?;
        Ok(bytes.into_inner())
    }
}
