//! Execution backends
//!
//! An [`ExecutionBackend`] takes a fully patched batch of documents, persists
//! the job record and runs it. [`LocalBackend`] applies the batch directly
//! through a [`ClusterClient`]; [`KubeClusterClient`] is the kube-rs
//! implementation of that client.

#![deny(missing_docs)]

pub mod backend;
pub mod cluster;
pub mod error;
pub mod local;

pub use backend::{map_workflow_phase, ExecutionBackend, SubmitRequest, SubmitResult};
pub use cluster::{ClusterClient, KubeClusterClient, VolumeBindRequest};
pub use error::ExecutorError;
pub use local::LocalBackend;
