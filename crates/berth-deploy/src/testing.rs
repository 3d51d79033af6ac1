//! Test doubles for collaborators defined in other crates

use std::collections::BTreeMap;

use async_trait::async_trait;
use berth_executor::{
    ClusterClient, ExecutionBackend, ExecutorError, SubmitRequest, SubmitResult, VolumeBindRequest,
};
use berth_manifest::SubmissionMode;
use berth_store::{JobId, JobStatus};
use serde_json::Value;

mockall::mock! {
    pub Cluster {}

    #[async_trait]
    impl ClusterClient for Cluster {
        async fn ensure_namespace(
            &self,
            name: &str,
            labels: &BTreeMap<String, String>,
        ) -> berth_common::Result<()>;
        async fn apply(&self, namespace: &str, manifest: &Value) -> berth_common::Result<()>;
        async fn delete(&self, namespace: &str, manifest: &Value) -> berth_common::Result<()>;
        async fn delete_workloads(
            &self,
            namespace: &str,
            mode: SubmissionMode,
            job_id: &JobId,
        ) -> berth_common::Result<()>;
        async fn workflow_phase(
            &self,
            namespace: &str,
            job_id: &JobId,
        ) -> berth_common::Result<Option<String>>;
        async fn bind_volume(&self, request: &VolumeBindRequest) -> berth_common::Result<()>;
    }
}

mockall::mock! {
    pub Backend {}

    #[async_trait]
    impl ExecutionBackend for Backend {
        async fn submit(&self, request: SubmitRequest) -> Result<SubmitResult, ExecutorError>;
        async fn cancel(&self, job_id: &JobId) -> Result<(), ExecutorError>;
        async fn status(&self, job_id: &JobId) -> Result<JobStatus, ExecutorError>;
    }
}
