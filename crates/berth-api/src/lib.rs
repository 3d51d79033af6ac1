//! Berth HTTP API
//!
//! A JSON API over the deploy pipeline. Callers are authenticated upstream;
//! identity arrives in `x-berth-*` headers.
//!
//! # Endpoints
//!
//! - `POST /v1/projects/{project}/versions` - store a manifest version
//! - `POST /v1/jobs` - deploy a version
//! - `POST /v1/jobs/{id}/cancel` - cancel a job
//! - `GET /healthz` - Health check

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod identity;
pub mod server;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use server::{router, serve, AppState};
