//! Shared HTTP client construction.

use crate::config::HttpConfig;
use crate::error::Result;
use reqwest::Client;

/// Build the client shared by the locator, lister and downloader.
///
/// Connection pooling happens inside `reqwest::Client`, so one instance is
/// created per process and cloned where needed. `request_timeout` bounds each
/// read, not the whole transfer.
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    let client = Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.request_timeout)
        .user_agent(config.user_agent.clone())
        .build()?;
    Ok(client)
}

/// Join a base URL and relative segments with single slashes.
pub fn join_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        url.push('/');
        url.push_str(segment);
    }
    url
}
