//! Archive root resolution.
//!
//! Probes each candidate root in configured order and returns the first one
//! that answers HTTP 200 for the entity directory. Results are memoised for
//! the lifetime of the locator, which is one run.

use crate::archive::layout::EntityLayout;
use crate::error::{IngestError, Result};
use floatsync_common::EntityId;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct ArchiveLocator {
    client: Client,
    roots: Vec<String>,
    probe_timeout: Duration,
    resolved: Mutex<HashMap<EntityId, String>>,
}

impl ArchiveLocator {
    pub fn new(client: Client, roots: Vec<String>, probe_timeout: Duration) -> Self {
        Self {
            client,
            roots,
            probe_timeout,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Return the archive root hosting `entity`.
    pub async fn locate(&self, entity: &EntityId) -> Result<EntityLayout> {
        if let Some(root) = self.resolved.lock().await.get(entity) {
            return Ok(EntityLayout::new(root.clone(), entity.clone()));
        }

        for root in &self.roots {
            let layout = EntityLayout::new(root.clone(), entity.clone());
            if self.probe(&layout).await {
                info!(entity = %entity, root = %root, "Resolved archive root");
                self.resolved
                    .lock()
                    .await
                    .insert(entity.clone(), root.clone());
                return Ok(layout);
            }
        }

        Err(IngestError::NoArchiveFound {
            entity: entity.clone(),
        })
    }

    async fn probe(&self, layout: &EntityLayout) -> bool {
        let url = layout.entity_url();

        let response = match self
            .client
            .head(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!(url = %url, error = %e, "Archive probe failed");
                return false;
            },
        };

        // Some listing servers refuse HEAD; fall back to a GET on the same path.
        let status = if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            match self
                .client
                .get(&url)
                .timeout(self.probe_timeout)
                .send()
                .await
            {
                Ok(resp) => resp.status(),
                Err(e) => {
                    debug!(url = %url, error = %e, "Archive probe failed");
                    return false;
                },
            }
        } else {
            response.status()
        };

        debug!(url = %url, status = status.as_u16(), "Archive probe");
        status == StatusCode::OK
    }
}
