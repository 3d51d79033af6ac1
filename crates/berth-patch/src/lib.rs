//! Resource patch engine
//!
//! Turns validated manifest documents into the objects actually applied:
//! placeholders resolved, identity labels stamped, and tenancy policy
//! enforced (image allow-list, read-only shared volume, GPU quota, security
//! context, scheduling metadata, runtime deadline).

#![deny(missing_docs)]

pub mod context;
pub mod engine;
pub mod error;
pub mod placeholder;
pub mod steps;
pub mod view;

pub use context::{
    AlternateScheduler, ImageRef, ImageRules, PatchConfig, PatchContext, ProjectLimits,
};
pub use engine::{PatchEngine, PatchedDocument};
pub use error::PatchError;
pub use placeholder::Placeholders;
