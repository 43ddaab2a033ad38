//! CLI command implementations.

pub mod fleet;
pub mod pipelines;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use url::Url;

/// Thin JSON client for the chief API.
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid API path {}", path))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self.http.get(self.url(path)?).query(query).send().await?;
        decode(response).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.http.post(self.url(path)?).json(body).send().await?;
        decode(response).await
    }
}

/// Turn an API response into `T`, or into the `{"error"}` it carries.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        bail!("{} ({})", error_message(&body), status);
    }
    serde_json::from_str(&body).with_context(|| format!("unexpected response: {}", body))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

pub fn validate(path: &Path) -> Result<()> {
    match irgsh_config::load_system_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  chief:      {} ({})", config.chief.address, config.chief.workdir.display());
            println!("  queue:      {}", config.queue.name);
            println!(
                "  monitoring: {}",
                if config.monitoring.enabled { "enabled" } else { "disabled" }
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
