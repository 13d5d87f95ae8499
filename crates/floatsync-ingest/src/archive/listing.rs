//! Directory listing of an entity's profile files.

use crate::archive::layout::EntityLayout;
use crate::error::{IngestError, Result};
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info};

pub struct FileLister {
    client: Client,
    extension: String,
}

impl FileLister {
    pub fn new(client: Client, extension: impl Into<String>) -> Self {
        Self {
            client,
            extension: extension.into(),
        }
    }

    /// Fetch `{root}/{id}/profiles/` and return the data file names it links.
    pub async fn list(&self, layout: &EntityLayout) -> Result<Vec<String>> {
        let url = layout.profiles_url();
        let unavailable = |message: String| IngestError::ListingUnavailable {
            entity: layout.entity().clone(),
            url: url.clone(),
            message,
        };

        debug!(entity = %layout.entity(), url = %url, "Fetching profile listing");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let files = parse_listing(&body, &self.extension)?;

        info!(entity = %layout.entity(), count = files.len(), "Listed profile files");
        Ok(files)
    }
}

/// Extract linked file names ending in `extension` from an HTML listing.
///
/// Hrefs may be relative or absolute and may carry query strings; only the
/// final path segment is kept. Order of first appearance is preserved.
pub fn parse_listing(html: &str, extension: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]")
        .map_err(|e| IngestError::Config(format!("invalid listing selector: {}", e)))?;
    let extension = extension.to_ascii_lowercase();

    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim();
        let name = href.rsplit('/').next().unwrap_or_default();

        if name.len() <= extension.len() || !name.to_ascii_lowercase().ends_with(&extension) {
            continue;
        }
        if seen.insert(name.to_string()) {
            files.push(name.to_string());
        }
    }

    Ok(files)
}
