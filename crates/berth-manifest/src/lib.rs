//! Manifest parsing, validation and classification
//!
//! A manifest is a multi-document YAML text. [`parse_manifest`] turns it into
//! validated [`ParsedDocument`]s; [`resolve_mode`] and [`filter_by_mode`]
//! narrow a document set to what a submission mode deploys.

#![deny(missing_docs)]

pub mod error;
pub mod filter;
pub mod kind;
pub mod parser;
pub mod pod;
pub mod quantity;
pub mod validate;

pub use error::ManifestError;
pub use filter::{filter_by_mode, resolve_mode, Classified};
pub use kind::{DocumentKind, SubmissionMode, WorkloadClass};
pub use parser::{parse_manifest, ParsedDocument};
pub use pod::{PodSpecLocation, PodSpecLocator};
