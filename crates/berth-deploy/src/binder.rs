//! Tenant namespaces and volume binding
//!
//! Every (project, user) pair deploys into its own namespace. Volumes live in
//! storage namespaces (one per user, one per group) and are bound into the
//! tenant namespace on demand, based on the claims the manifest references.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use berth_common::naming::{safe_name, truncate_label};
use berth_executor::{ClusterClient, VolumeBindRequest};
use berth_manifest::pod::claim_names;
use berth_manifest::PodSpecLocator;
use berth_patch::Placeholders;
use berth_store::{Document, Project, ProjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DeployError, DeployResult};
use crate::Actor;

#[cfg(test)]
use mockall::automock;

const USER_VOLUME_TOKEN: &str = "userVolume";
const GROUP_VOLUME_TOKEN: &str = "groupVolume";

/// A user's role in a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    /// Plain member
    Member,
    /// Group manager
    Manager,
    /// Group administrator
    Admin,
}

impl GroupRole {
    /// Whether the role may write to shared group storage
    pub fn can_write_shared(&self) -> bool {
        matches!(self, Self::Manager | Self::Admin)
    }
}

impl FromStr for GroupRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" | "user" => Ok(Self::Member),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown group role '{other}'")),
        }
    }
}

/// Access a user has to one group storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoragePermission {
    /// No access
    None,
    /// Read only
    Read,
    /// Read and write
    Write,
}

impl StoragePermission {
    /// Whether the permission includes reading
    pub fn can_read(&self) -> bool {
        *self >= Self::Read
    }
}

/// A storage volume owned by a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStorage {
    /// Storage id
    pub id: String,
    /// Claim name in the group storage namespace
    pub pvc_name: String,
    /// Owning group
    pub group_id: String,
}

/// Group membership and storage lookups
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenancyDirectory: Send + Sync {
    /// The user's role in a group, `None` if not a member
    async fn group_role(&self, group_id: &str, user_id: &str)
        -> berth_common::Result<Option<GroupRole>>;

    /// Storages owned by a group, in a stable order
    async fn group_storages(&self, group_id: &str) -> berth_common::Result<Vec<GroupStorage>>;

    /// The user's permission on one group storage
    async fn storage_permission(
        &self,
        group_id: &str,
        user_id: &str,
        storage_id: &str,
    ) -> berth_common::Result<StoragePermission>;
}

/// Naming of storage namespaces and claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderConfig {
    /// Personal storage namespace; `{user}` is the safe username
    pub user_storage_namespace: String,
    /// Personal claim name; `{user}` is the safe username
    pub user_volume: String,
    /// Group storage namespace; `{group}` is the group id
    pub group_storage_namespace: String,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            user_storage_namespace: "user-{user}-storage".to_string(),
            user_volume: "user-{user}-disk".to_string(),
            group_storage_namespace: "group-{group}-storage".to_string(),
        }
    }
}

impl BinderConfig {
    fn user_namespace(&self, safe_user: &str) -> String {
        truncate_label(&self.user_storage_namespace.replace("{user}", safe_user))
    }

    fn user_claim(&self, safe_user: &str) -> String {
        truncate_label(&self.user_volume.replace("{user}", safe_user))
    }

    fn group_namespace(&self, group_id: &str) -> String {
        truncate_label(&self.group_storage_namespace.replace("{group}", &safe_name(group_id)))
    }
}

/// Volumes bound for one deploy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeBinding {
    /// Personal claim bound into the tenant namespace
    pub user_volume: Option<String>,
    /// Shared group claim; the first group storage when referenced by token
    pub group_volume: Option<String>,
    /// Whether mounts of the group claim must be read-only
    pub read_only: bool,
}

/// Tenant namespace for a project and user: `proj-<project>-<safe user>`
pub fn namespace_name(project_id: &ProjectId, username: &str) -> String {
    safe_name(&format!("proj-{}-{}", project_id, safe_name(username)))
}

/// Values for `{{key}}` tokens in a deploy
pub fn placeholders(
    project_id: &ProjectId,
    actor: &Actor,
    namespace: &str,
    binding: &VolumeBinding,
) -> Placeholders {
    let safe_user = safe_name(&actor.username);
    [
        ("username", safe_user.clone()),
        ("safeUsername", safe_user),
        ("originalUsername", actor.username.clone()),
        ("userId", actor.user_id.clone()),
        ("namespace", namespace.to_string()),
        ("projectId", project_id.to_string()),
        (USER_VOLUME_TOKEN, binding.user_volume.clone().unwrap_or_default()),
        (GROUP_VOLUME_TOKEN, binding.group_volume.clone().unwrap_or_default()),
    ]
    .into_iter()
    .collect()
}

/// Claim names referenced by any pod spec of the documents
pub fn collect_claims(documents: &[Document]) -> BTreeSet<String> {
    let mut claims = BTreeSet::new();
    for doc in documents {
        for location in PodSpecLocator::locate(&doc.content) {
            let Some(pod_spec) = doc.content.pointer(&location.spec) else {
                continue;
            };
            claims.extend(
                claim_names(pod_spec)
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string),
            );
        }
    }
    claims
}

/// Resolves and binds volumes for deploys
pub struct Binder {
    directory: Arc<dyn TenancyDirectory>,
    cluster: Arc<dyn ClusterClient>,
    config: BinderConfig,
}

impl Binder {
    /// Create a binder
    pub fn new(
        directory: Arc<dyn TenancyDirectory>,
        cluster: Arc<dyn ClusterClient>,
        config: BinderConfig,
    ) -> Self {
        Self {
            directory,
            cluster,
            config,
        }
    }

    /// Whether the actor's group volume mounts must be read-only.
    ///
    /// Admins and group managers/admins write; members read. Non-members are
    /// refused.
    pub async fn read_only(&self, project: &Project, actor: &Actor) -> DeployResult<bool> {
        if actor.is_admin {
            return Ok(false);
        }
        match self
            .directory
            .group_role(&project.group_id, &actor.user_id)
            .await?
        {
            Some(role) => Ok(!role.can_write_shared()),
            None => Err(DeployError::Forbidden(format!(
                "user {} is not a member of group {}",
                actor.user_id, project.group_id
            ))),
        }
    }

    /// Bind the volumes the documents reference into `namespace`
    pub async fn bind(
        &self,
        project: &Project,
        actor: &Actor,
        namespace: &str,
        documents: &[Document],
    ) -> DeployResult<VolumeBinding> {
        let read_only = self.read_only(project, actor).await?;
        let mut binding = VolumeBinding {
            read_only,
            ..Default::default()
        };

        let claims = collect_claims(documents);
        if claims.is_empty() {
            return Ok(binding);
        }

        let mut uses_user_volume = false;
        let mut uses_group_token = false;
        let mut group_claims = BTreeSet::new();
        for claim in claims {
            if claim.contains(USER_VOLUME_TOKEN) {
                uses_user_volume = true;
            } else if claim.contains(GROUP_VOLUME_TOKEN) {
                uses_group_token = true;
            } else {
                group_claims.insert(claim);
            }
        }

        let storages = if uses_group_token || !group_claims.is_empty() {
            self.directory.group_storages(&project.group_id).await?
        } else {
            Vec::new()
        };
        let by_claim: BTreeMap<&str, &GroupStorage> =
            storages.iter().map(|s| (s.pvc_name.as_str(), s)).collect();

        if uses_group_token {
            let first = storages.first().ok_or_else(|| {
                DeployError::Invalid(format!(
                    "no group storage available for group {}",
                    project.group_id
                ))
            })?;
            group_claims.insert(first.pvc_name.clone());
            binding.group_volume = Some(first.pvc_name.clone());
        }

        if uses_user_volume {
            let safe_user = safe_name(&actor.username);
            let claim = self.config.user_claim(&safe_user);
            self.cluster
                .bind_volume(&VolumeBindRequest {
                    source_namespace: self.config.user_namespace(&safe_user),
                    source_claim: claim.clone(),
                    target_namespace: namespace.to_string(),
                    target_claim: claim.clone(),
                })
                .await?;
            debug!(namespace, claim = %claim, "bound user volume");
            binding.user_volume = Some(claim);
        }

        for claim in &group_claims {
            let storage = by_claim.get(claim.as_str()).ok_or_else(|| {
                DeployError::Invalid(format!(
                    "group storage {claim} not found in group {}",
                    project.group_id
                ))
            })?;

            if !actor.is_admin {
                let permission = self
                    .directory
                    .storage_permission(&storage.group_id, &actor.user_id, &storage.id)
                    .await?;
                if !permission.can_read() {
                    return Err(DeployError::Forbidden(format!(
                        "user does not have access to group storage {claim}"
                    )));
                }
            }

            self.cluster
                .bind_volume(&VolumeBindRequest {
                    source_namespace: self.config.group_namespace(&storage.group_id),
                    source_claim: claim.clone(),
                    target_namespace: namespace.to_string(),
                    target_claim: claim.clone(),
                })
                .await?;
            debug!(namespace, claim = %claim, "bound group volume");
            if binding.group_volume.is_none() {
                binding.group_volume = Some(claim.clone());
            }
        }

        info!(
            namespace,
            user_volume = ?binding.user_volume,
            group_volume = ?binding.group_volume,
            read_only = binding.read_only,
            "volumes bound"
        );
        Ok(binding)
    }

    /// Claim names a deploy would use, without binding anything
    pub async fn expected_binding(
        &self,
        project: &Project,
        actor: &Actor,
    ) -> DeployResult<VolumeBinding> {
        let storages = self.directory.group_storages(&project.group_id).await?;
        Ok(VolumeBinding {
            user_volume: Some(self.config.user_claim(&safe_name(&actor.username))),
            group_volume: storages.first().map(|s| s.pvc_name.clone()),
            read_only: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCluster as MockClusterClient;
    use berth_manifest::DocumentKind;
    use berth_store::VersionId;
    use serde_json::{json, Value};

    fn project() -> Project {
        Project {
            id: ProjectId::new("p1"),
            name: "vision".into(),
            group_id: "g1".into(),
            gpu_quota: 2,
            max_concurrent_jobs_per_user: 0,
            max_queued_jobs_per_user: 0,
            max_job_runtime_seconds: 0,
            schedule_windows: vec![],
        }
    }

    fn actor(admin: bool) -> Actor {
        Actor {
            user_id: "u1".into(),
            username: "Alice.Smith".into(),
            is_admin: admin,
        }
    }

    fn pod_with_claims(claims: &[&str]) -> Document {
        let volumes: Vec<Value> = claims
            .iter()
            .enumerate()
            .map(|(i, c)| {
                json!({"name": format!("v{i}"), "persistentVolumeClaim": {"claimName": c}})
            })
            .collect();
        Document {
            version_id: VersionId::new("v1"),
            position: 0,
            kind: DocumentKind::Pod,
            name: "trainer".into(),
            content: json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "trainer"},
                "spec": {"containers": [{"name": "c", "image": "busybox"}], "volumes": volumes}
            }),
        }
    }

    fn storages() -> Vec<GroupStorage> {
        vec![
            GroupStorage {
                id: "s1".into(),
                pvc_name: "datasets".into(),
                group_id: "g1".into(),
            },
            GroupStorage {
                id: "s2".into(),
                pvc_name: "checkpoints".into(),
                group_id: "g1".into(),
            },
        ]
    }

    fn member_directory(role: Option<GroupRole>) -> MockTenancyDirectory {
        let mut directory = MockTenancyDirectory::new();
        directory
            .expect_group_role()
            .returning(move |_, _| Ok(role));
        directory.expect_group_storages().returning(|_| Ok(storages()));
        directory
    }

    #[test]
    fn namespace_is_a_safe_label() {
        assert_eq!(
            namespace_name(&ProjectId::new("p1"), "Alice.Smith"),
            "proj-p1-alice-smith"
        );
        let long = "x".repeat(100);
        assert!(namespace_name(&ProjectId::new("p1"), &long).len() <= 63);
    }

    #[test]
    fn placeholders_cover_identity_and_volumes() {
        let binding = VolumeBinding {
            user_volume: Some("user-alice-smith-disk".into()),
            group_volume: None,
            read_only: true,
        };
        let values = placeholders(&ProjectId::new("p1"), &actor(false), "ns", &binding);
        assert_eq!(values.get("username"), Some("alice-smith"));
        assert_eq!(values.get("originalUsername"), Some("Alice.Smith"));
        assert_eq!(values.get("userId"), Some("u1"));
        assert_eq!(values.get("userVolume"), Some("user-alice-smith-disk"));
        assert_eq!(values.get("groupVolume"), Some(""));
    }

    #[tokio::test]
    async fn members_get_read_only_and_managers_do_not() {
        let cluster = Arc::new(MockClusterClient::new());
        let binder = Binder::new(
            Arc::new(member_directory(Some(GroupRole::Member))),
            cluster.clone(),
            BinderConfig::default(),
        );
        assert!(binder.read_only(&project(), &actor(false)).await.unwrap());
        assert!(!binder.read_only(&project(), &actor(true)).await.unwrap());

        let binder = Binder::new(
            Arc::new(member_directory(Some(GroupRole::Manager))),
            cluster,
            BinderConfig::default(),
        );
        assert!(!binder.read_only(&project(), &actor(false)).await.unwrap());
    }

    #[tokio::test]
    async fn non_members_are_forbidden() {
        let binder = Binder::new(
            Arc::new(member_directory(None)),
            Arc::new(MockClusterClient::new()),
            BinderConfig::default(),
        );
        let err = binder.read_only(&project(), &actor(false)).await.unwrap_err();
        assert!(matches!(err, DeployError::Forbidden(_)));
    }

    #[tokio::test]
    async fn binds_user_and_first_group_storage_for_tokens() {
        let mut directory = member_directory(Some(GroupRole::Member));
        directory
            .expect_storage_permission()
            .returning(|_, _, _| Ok(StoragePermission::Read));

        let mut cluster = MockClusterClient::new();
        cluster
            .expect_bind_volume()
            .withf(|r| {
                r.source_namespace == "user-alice-smith-storage"
                    && r.source_claim == "user-alice-smith-disk"
                    && r.target_namespace == "proj-p1-alice-smith"
            })
            .times(1)
            .returning(|_| Ok(()));
        cluster
            .expect_bind_volume()
            .withf(|r| r.source_namespace == "group-g1-storage" && r.source_claim == "datasets")
            .times(1)
            .returning(|_| Ok(()));

        let binder = Binder::new(Arc::new(directory), Arc::new(cluster), BinderConfig::default());
        let binding = binder
            .bind(
                &project(),
                &actor(false),
                "proj-p1-alice-smith",
                &[pod_with_claims(&["{{userVolume}}", "{{groupVolume}}"])],
            )
            .await
            .unwrap();

        assert_eq!(binding.user_volume.as_deref(), Some("user-alice-smith-disk"));
        assert_eq!(binding.group_volume.as_deref(), Some("datasets"));
        assert!(binding.read_only);
    }

    #[tokio::test]
    async fn unknown_literal_claim_is_rejected() {
        let binder = Binder::new(
            Arc::new(member_directory(Some(GroupRole::Admin))),
            Arc::new(MockClusterClient::new()),
            BinderConfig::default(),
        );
        let err = binder
            .bind(&project(), &actor(false), "ns", &[pod_with_claims(&["scratch"])])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "group storage scratch not found in group g1");
    }

    #[tokio::test]
    async fn storage_without_read_permission_is_forbidden() {
        let mut directory = member_directory(Some(GroupRole::Member));
        directory
            .expect_storage_permission()
            .returning(|_, _, _| Ok(StoragePermission::None));
        let mut cluster = MockClusterClient::new();
        cluster.expect_bind_volume().never();

        let binder = Binder::new(Arc::new(directory), Arc::new(cluster), BinderConfig::default());
        let err = binder
            .bind(&project(), &actor(false), "ns", &[pod_with_claims(&["checkpoints"])])
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Forbidden(_)));
    }

    #[tokio::test]
    async fn admins_skip_storage_permission_checks() {
        let mut directory = MockTenancyDirectory::new();
        directory.expect_group_role().never();
        directory.expect_group_storages().returning(|_| Ok(storages()));
        directory.expect_storage_permission().never();
        let mut cluster = MockClusterClient::new();
        cluster.expect_bind_volume().times(1).returning(|_| Ok(()));

        let binder = Binder::new(Arc::new(directory), Arc::new(cluster), BinderConfig::default());
        let binding = binder
            .bind(&project(), &actor(true), "ns", &[pod_with_claims(&["checkpoints"])])
            .await
            .unwrap();
        assert_eq!(binding.group_volume.as_deref(), Some("checkpoints"));
        assert!(!binding.read_only);
    }

    #[test]
    fn claims_are_collected_from_nested_pod_specs() {
        let doc = Document {
            version_id: VersionId::new("v1"),
            position: 0,
            kind: DocumentKind::CronJob,
            name: "nightly".into(),
            content: json!({
                "spec": {"jobTemplate": {"spec": {"template": {"spec": {
                    "containers": [],
                    "volumes": [{"name": "d", "persistentVolumeClaim": {"claimName": " datasets "}}]
                }}}}}
            }),
        };
        assert_eq!(
            collect_claims(&[doc]).into_iter().collect::<Vec<_>>(),
            vec!["datasets".to_string()]
        );
    }
}
