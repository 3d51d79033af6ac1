//! Submission-mode filtering

use crate::error::ManifestError;
use crate::kind::{DocumentKind, SubmissionMode, WorkloadClass};
use crate::parser::ParsedDocument;

/// Anything that carries a classified document kind
pub trait Classified {
    /// The document's kind
    fn document_kind(&self) -> DocumentKind;
}

impl Classified for ParsedDocument {
    fn document_kind(&self) -> DocumentKind {
        self.kind
    }
}

/// Keep the workload documents of `mode` plus every supporting resource.
///
/// Workloads of the other mode are dropped. Fails when no workload of the
/// requested mode remains.
pub fn filter_by_mode<D: Classified>(
    docs: Vec<D>,
    mode: SubmissionMode,
) -> Result<Vec<D>, ManifestError> {
    let wanted = mode.workload_class();
    let kept: Vec<D> = docs
        .into_iter()
        .filter(|d| match d.document_kind().workload_class() {
            WorkloadClass::Other => true,
            class => class == wanted,
        })
        .collect();

    if !kept
        .iter()
        .any(|d| d.document_kind().workload_class() == wanted)
    {
        return Err(ManifestError::NoWorkloads { mode });
    }
    Ok(kept)
}

/// Pick the submission mode for a batch and filter it.
///
/// A requested mode always filters. Without one, the batch runs as a
/// workflow when it holds workflow kinds and no ordinary kinds, and as a job
/// otherwise. A batch with no workload at all only passes when no mode was
/// requested, and then runs in job mode.
pub fn resolve_mode<D: Classified>(
    docs: Vec<D>,
    requested: Option<SubmissionMode>,
) -> Result<(SubmissionMode, Vec<D>), ManifestError> {
    if let Some(mode) = requested {
        return Ok((mode, filter_by_mode(docs, mode)?));
    }

    let has = |class: WorkloadClass| {
        docs.iter()
            .any(|d| d.document_kind().workload_class() == class)
    };
    let (ordinary, workflow) = (has(WorkloadClass::Ordinary), has(WorkloadClass::Workflow));
    let mode = match (ordinary, workflow) {
        (false, false) => return Ok((SubmissionMode::Job, docs)),
        (false, true) => SubmissionMode::Workflow,
        (true, _) => SubmissionMode::Job,
    };
    Ok((mode, filter_by_mode(docs, mode)?))
}
