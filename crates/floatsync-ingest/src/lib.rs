//! Floatsync Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental ingestion of per-entity cycle files from a remote archive into
//! Postgres.
//!
//! # Pipeline
//!
//! 1. [`archive::ArchiveLocator`] finds which archive root hosts an entity
//! 2. [`archive::FileLister`] reads the entity's profile listing
//! 3. [`archive::resolve`] keeps the most authoritative file per cycle
//! 4. [`delta::pending_cycles`] drops cycles already persisted
//! 5. [`pool::IngestionPool`] stages, extracts and writes each pending cycle
//!    through [`cache::ResourceCache`] and a [`store::CycleStore`]
//!
//! [`sync::EntitySync`] wires these together for one or many entities.
//!
//! # Example
//!
//! ```no_run
//! use floatsync_common::EntityId;
//! use floatsync_ingest::config::IngestConfig;
//! use floatsync_ingest::extract::CommandExtractor;
//! use floatsync_ingest::store::{postgres, PgStore};
//! use floatsync_ingest::sync::EntitySync;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let db = postgres::create_pool(&postgres::DbConfig::from_env()?).await?;
//!     let extractor = CommandExtractor::from_command_line("argo-extract")
//!         .ok_or_else(|| anyhow::anyhow!("empty extractor command"))?;
//!
//!     let sync = EntitySync::from_config(
//!         &config,
//!         floatsync_ingest::http::build_client(&config.http)?,
//!         Arc::new(extractor),
//!         Arc::new(PgStore::new(db)),
//!         CancellationToken::new(),
//!     );
//!     let report = sync.sync_entities(&[EntityId::new("4903220")?]).await;
//!     report.log();
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod delta;
pub mod error;
pub mod extract;
pub mod http;
pub mod pool;
pub mod records;
pub mod siblings;
pub mod store;
pub mod sync;

pub use error::{IngestError, Result};
