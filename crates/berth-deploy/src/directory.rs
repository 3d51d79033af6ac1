//! File-backed tenancy directory
//!
//! Group membership, storage permissions and image allow-lists are owned by
//! systems outside Berth. For single-node setups and tests they can be read
//! from one YAML file instead:
//!
//! ```yaml
//! projects:
//!   - id: p1
//!     name: vision
//!     group_id: g1
//!     gpu_quota: 2
//!     max_concurrent_jobs_per_user: 2
//!     max_queued_jobs_per_user: 4
//!     max_job_runtime_seconds: 0
//! groups:
//!   - id: g1
//!     members: { u1: manager, u2: member }
//!     storages:
//!       - id: s1
//!         pvc_name: datasets
//!         permissions: { u2: read }
//! images:
//!   - image: busybox:1.36
//!   - image: pytorch/pytorch:2.1
//!     project_id: p1
//!     mirrored: true
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use berth_common::yaml::parse_yaml_documents;
use berth_common::{Error, Result};
use berth_patch::{ImageRef, ImageRules};
use berth_store::{Project, ProjectId};
use serde::{Deserialize, Serialize};

use crate::binder::{GroupRole, GroupStorage, StoragePermission, TenancyDirectory};
use crate::service::ImageCatalog;

/// One group storage and who may read it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    /// Storage id
    pub id: String,
    /// Claim name in the group storage namespace
    pub pvc_name: String,
    /// Per-user permission; absent users have none
    #[serde(default)]
    pub permissions: BTreeMap<String, StoragePermission>,
}

/// A group, its members and storages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Group id
    pub id: String,
    /// Role by user id
    #[serde(default)]
    pub members: BTreeMap<String, GroupRole>,
    /// Storages in binding order
    #[serde(default)]
    pub storages: Vec<StorageEntry>,
}

/// An allowed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// `name[:tag]`
    pub image: String,
    /// Restrict to one project; absent means every project
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    /// Served from the private registry mirror
    #[serde(default)]
    pub mirrored: bool,
}

/// Contents of a tenancy file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticDirectory {
    /// Projects to seed into the project store
    #[serde(default)]
    pub projects: Vec<Project>,
    /// Groups
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
    /// Image allow-list
    #[serde(default)]
    pub images: Vec<ImageEntry>,
}

impl StaticDirectory {
    /// Parse a tenancy file
    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut docs = parse_yaml_documents(text).map_err(|e| Error::validation(e.to_string()))?;
        if docs.len() > 1 {
            return Err(Error::validation("tenancy file must hold a single document"));
        }
        match docs.pop() {
            Some(doc) => serde_json::from_value(doc)
                .map_err(|e| Error::validation_for_field("tenancy", e.to_string())),
            None => Ok(Self::default()),
        }
    }

    fn group(&self, group_id: &str) -> Option<&GroupEntry> {
        self.groups.iter().find(|g| g.id == group_id)
    }
}

#[async_trait]
impl TenancyDirectory for StaticDirectory {
    async fn group_role(&self, group_id: &str, user_id: &str) -> Result<Option<GroupRole>> {
        Ok(self
            .group(group_id)
            .and_then(|g| g.members.get(user_id))
            .copied())
    }

    async fn group_storages(&self, group_id: &str) -> Result<Vec<GroupStorage>> {
        Ok(self
            .group(group_id)
            .map(|g| {
                g.storages
                    .iter()
                    .map(|s| GroupStorage {
                        id: s.id.clone(),
                        pvc_name: s.pvc_name.clone(),
                        group_id: g.id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn storage_permission(
        &self,
        group_id: &str,
        user_id: &str,
        storage_id: &str,
    ) -> Result<StoragePermission> {
        Ok(self
            .group(group_id)
            .and_then(|g| g.storages.iter().find(|s| s.id == storage_id))
            .and_then(|s| s.permissions.get(user_id))
            .copied()
            .unwrap_or(StoragePermission::None))
    }
}

#[async_trait]
impl ImageCatalog for StaticDirectory {
    async fn rules(&self, project_id: &ProjectId) -> Result<ImageRules> {
        let mut rules = ImageRules::default();
        for entry in &self.images {
            if entry.project_id.as_ref().is_some_and(|p| p != project_id) {
                continue;
            }
            let image = ImageRef::parse(&entry.image);
            if entry.mirrored {
                rules.allow_mirrored(image);
            } else {
                rules.allow(image);
            }
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"
projects:
  - id: p1
    name: vision
    group_id: g1
    gpu_quota: 2
    max_concurrent_jobs_per_user: 2
    max_queued_jobs_per_user: 4
    max_job_runtime_seconds: 3600
    schedule_windows:
      - { weekday: 1, start: "09:00", end: "17:00" }
groups:
  - id: g1
    members: { u1: manager, u2: member }
    storages:
      - id: s1
        pvc_name: datasets
        permissions: { u2: read }
      - id: s2
        pvc_name: checkpoints
images:
  - image: busybox:1.36
  - image: pytorch/pytorch:2.1
    project_id: p1
    mirrored: true
  - image: secret/tool
    project_id: p2
"#;

    #[test]
    fn parses_projects_groups_and_images() {
        let dir = StaticDirectory::from_yaml(FILE).unwrap();
        assert_eq!(dir.projects.len(), 1);
        assert_eq!(dir.projects[0].max_job_runtime_seconds, 3600);
        assert_eq!(dir.projects[0].schedule_windows[0].weekday, 1);
        assert_eq!(dir.groups[0].storages.len(), 2);
    }

    #[test]
    fn empty_file_is_an_empty_directory() {
        assert_eq!(StaticDirectory::from_yaml("").unwrap(), StaticDirectory::default());
    }

    #[test]
    fn malformed_file_is_rejected() {
        assert!(StaticDirectory::from_yaml("groups: 3").is_err());
    }

    #[tokio::test]
    async fn answers_membership_and_permission_queries() {
        let dir = StaticDirectory::from_yaml(FILE).unwrap();
        assert_eq!(dir.group_role("g1", "u1").await.unwrap(), Some(GroupRole::Manager));
        assert_eq!(dir.group_role("g1", "u9").await.unwrap(), None);
        assert_eq!(dir.group_role("g9", "u1").await.unwrap(), None);

        let storages = dir.group_storages("g1").await.unwrap();
        assert_eq!(storages[0].pvc_name, "datasets");
        assert_eq!(storages[0].group_id, "g1");

        assert_eq!(
            dir.storage_permission("g1", "u2", "s1").await.unwrap(),
            StoragePermission::Read
        );
        assert_eq!(
            dir.storage_permission("g1", "u2", "s2").await.unwrap(),
            StoragePermission::None
        );
    }

    #[tokio::test]
    async fn image_rules_merge_global_and_project_entries() {
        let dir = StaticDirectory::from_yaml(FILE).unwrap();
        let rules = dir.rules(&ProjectId::new("p1")).await.unwrap();
        assert!(rules.is_allowed(&ImageRef::new("busybox", "1.36")));
        assert!(rules.is_mirrored(&ImageRef::new("pytorch/pytorch", "2.1")));
        assert!(!rules.is_allowed(&ImageRef::new("secret/tool", "latest")));
    }
}
