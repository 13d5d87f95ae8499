//! URL layout of an entity inside an archive root.

use crate::http::join_url;
use floatsync_common::EntityId;

/// Trajectory file suffixes in preference order: delayed-mode first.
pub const TRAJECTORY_SUFFIXES: &[&str] = &["_Dtraj.nc", "_Rtraj.nc", "_traj.nc"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLayout {
    root: String,
    entity: EntityId,
}

impl EntityLayout {
    pub fn new(root: impl Into<String>, entity: EntityId) -> Self {
        Self {
            root: root.into(),
            entity,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    /// `{root}/{id}/`, the existence probe target.
    pub fn entity_url(&self) -> String {
        format!("{}/", join_url(&self.root, &[self.entity.as_str()]))
    }

    /// `{root}/{id}/profiles/`, the directory listing.
    pub fn profiles_url(&self) -> String {
        format!(
            "{}/",
            join_url(&self.root, &[self.entity.as_str(), "profiles"])
        )
    }

    pub fn profile_file_url(&self, file_name: &str) -> String {
        join_url(&self.root, &[self.entity.as_str(), "profiles", file_name])
    }

    fn sibling_url(&self, suffix: &str) -> String {
        let name = format!("{}{}", self.entity, suffix);
        join_url(&self.root, &[self.entity.as_str(), &name])
    }

    pub fn metadata_url(&self) -> String {
        self.sibling_url("_meta.nc")
    }

    pub fn tech_url(&self) -> String {
        self.sibling_url("_tech.nc")
    }

    pub fn trajectory_candidates(&self) -> Vec<String> {
        TRAJECTORY_SUFFIXES
            .iter()
            .map(|suffix| self.sibling_url(suffix))
            .collect()
    }
}
