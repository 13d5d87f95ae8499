//! Entity-level sibling files: metadata, technical and trajectory.
//!
//! These are loaded once per entity before the per-cycle fan-out. None of
//! them is required; a missing or broken sibling is logged and skipped.

use crate::archive::EntityLayout;
use crate::cache::ResourceCache;
use crate::error::Result;
use crate::records::{EntityRecords, RecordSet, SourcedRecords};
use tracing::{debug, info, warn};

/// Fetch and decode all sibling files for `layout`'s entity.
pub async fn load_entity_records(cache: &ResourceCache, layout: &EntityLayout) -> EntityRecords {
    let entity = layout.entity();

    let metadata = match open(cache, &layout.metadata_url()).await {
        Some((source_file, RecordSet::Metadata(records))) => Some(SourcedRecords {
            source_file,
            records,
        }),
        Some((source_file, _)) => {
            warn!(entity = %entity, file = %source_file, "Metadata file decoded to another kind");
            None
        },
        None => None,
    };

    let (tech, trajectory) = tokio::join!(
        load_tech(cache, layout),
        load_trajectory(cache, layout)
    );

    let records = EntityRecords {
        metadata,
        tech,
        trajectory,
    };

    info!(
        entity = %entity,
        metadata = records.metadata.is_some(),
        tech_rows = records.tech.as_ref().map_or(0, |t| t.records.len()),
        trajectory_rows = records.trajectory.as_ref().map_or(0, |t| t.records.len()),
        "Loaded entity records"
    );
    records
}

async fn load_tech(
    cache: &ResourceCache,
    layout: &EntityLayout,
) -> Option<SourcedRecords<Vec<crate::records::TechRecord>>> {
    match open(cache, &layout.tech_url()).await? {
        (source_file, RecordSet::Technical { records }) if !records.is_empty() => {
            Some(SourcedRecords {
                source_file,
                records,
            })
        },
        (source_file, RecordSet::Technical { .. }) => {
            debug!(entity = %layout.entity(), file = %source_file, "Technical file has no rows");
            None
        },
        (source_file, _) => {
            warn!(entity = %layout.entity(), file = %source_file, "Technical file decoded to another kind");
            None
        },
    }
}

/// First trajectory candidate that opens wins.
async fn load_trajectory(
    cache: &ResourceCache,
    layout: &EntityLayout,
) -> Option<SourcedRecords<Vec<crate::records::TrajectoryRecord>>> {
    for url in layout.trajectory_candidates() {
        match open(cache, &url).await {
            Some((source_file, RecordSet::Trajectory { records })) if !records.is_empty() => {
                return Some(SourcedRecords {
                    source_file,
                    records,
                });
            },
            Some((source_file, _)) => {
                debug!(entity = %layout.entity(), file = %source_file, "Trajectory candidate unusable");
            },
            None => {},
        }
    }
    None
}

/// Open one sibling, logging instead of failing.
async fn open(cache: &ResourceCache, url: &str) -> Option<(String, RecordSet)> {
    match try_open(cache, url).await {
        Ok(opened) => Some(opened),
        Err(e) if e.is_permanent_fetch() => {
            debug!(url = %url, error = %e, "Sibling file not available");
            None
        },
        Err(e) => {
            warn!(url = %url, kind = e.kind(), error = %e, "Failed to load sibling file");
            None
        },
    }
}

async fn try_open(cache: &ResourceCache, url: &str) -> Result<(String, RecordSet)> {
    let handle = cache.get_handle(url).await?;
    let source_file = handle
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.to_string());
    Ok((source_file, handle.records.clone()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::{Downloader, RetryPolicy};
    use crate::config::CacheConfig;
    use crate::extract::{ExtractError, RecordExtractor, SourceKind};
    use crate::records::{MetadataRecords, PlatformMetadata, TrajectoryRecord};
    use async_trait::async_trait;
    use floatsync_common::EntityId;
    use std::path::Path;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct KindExtractor;

    #[async_trait]
    impl RecordExtractor for KindExtractor {
        async fn extract(
            &self,
            kind: SourceKind,
            _path: &Path,
        ) -> std::result::Result<RecordSet, ExtractError> {
            Ok(match kind {
                SourceKind::Metadata => RecordSet::Metadata(MetadataRecords {
                    platform: PlatformMetadata {
                        platform_type: Some("APEX".into()),
                        ..Default::default()
                    },
                    attributes: vec![],
                }),
                SourceKind::Trajectory => RecordSet::Trajectory {
                    records: vec![TrajectoryRecord {
                        cycle: Some(1),
                        latitude: Some(10.0),
                        longitude: Some(20.0),
                        ..Default::default()
                    }],
                },
                SourceKind::Technical => RecordSet::Technical { records: vec![] },
                SourceKind::Profile => RecordSet::Profile(Default::default()),
            })
        }
    }

    #[tokio::test]
    async fn test_missing_siblings_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dac/1901234/1901234_meta.nc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("meta"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dac/1901234/1901234_Rtraj.nc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("traj"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            data_dir: dir.path().to_path_buf(),
            retry: RetryPolicy::immediate(1),
            ..CacheConfig::default()
        };
        let downloader = Downloader::new(
            reqwest::Client::new(),
            config.data_dir.clone(),
            config.retry.clone(),
            2,
        );
        let cache = ResourceCache::new(&config, downloader, Arc::new(KindExtractor));
        let layout = EntityLayout::new(
            format!("{}/dac", server.uri()),
            EntityId::new("1901234").unwrap(),
        );

        let records = load_entity_records(&cache, &layout).await;

        assert_eq!(
            records.platform().and_then(|p| p.platform_type.as_deref()),
            Some("APEX")
        );
        assert!(records.tech.is_none());
        let traj = records.trajectory.unwrap();
        assert_eq!(traj.source_file, "1901234_Rtraj.nc");
        assert_eq!(traj.records.len(), 1);
    }
}
