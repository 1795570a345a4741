//! Detection over a sample of the files in a directory.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::first_match;
use crate::error::SniffError;
use crate::expression::{CompiledDetectionExpression, DetectedTestObjectType};
use crate::fs::FileFilter;
use crate::resource::LocalResource;
use crate::sample;
use crate::sniff::SniffEngine;

/// How files are picked from a directory.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sampling {
    pub sample_size: usize,
    pub max_depth: usize,
    pub filter: FileFilter,
}

/// Best ranked detection over the sampled files of `resource`.
///
/// Each sample yields at most one detection: the first candidate (in the
/// given order) that matches it. Scanning stops once every candidate has
/// been detected.
pub(crate) fn detect(
    candidates: &[&CompiledDetectionExpression],
    engine: &SniffEngine,
    resource: &LocalResource,
    sampling: &Sampling,
) -> Option<DetectedTestObjectType> {
    if candidates.is_empty() {
        return None;
    }
    if !resource.file_system().is_dir(resource.dir()) {
        warn!(path = %resource.dir().display(), "not a directory");
        return None;
    }

    let files = match resource.list_files(sampling.max_depth, &sampling.filter) {
        Ok(files) => files,
        Err(e) => {
            warn!(path = %resource.dir().display(), error = %e, "cannot list directory");
            return None;
        }
    };
    if files.is_empty() {
        debug!(path = %resource.dir().display(), "no candidate files");
        return None;
    }

    let samples = sample::normal_distributed(&files, sampling.sample_size);
    debug!(
        path = %resource.dir().display(),
        files = files.len(),
        samples = samples.len(),
        "sampling directory"
    );

    let mut detected = BTreeSet::new();
    for path in &samples {
        let results = match resource
            .open(path)
            .map_err(SniffError::from)
            .and_then(|reader| engine.sniff(reader))
        {
            Ok(results) => results,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot sniff sample");
                continue;
            }
        };

        if let Some(found) = first_match(candidates, &results, resource.uri(), &path.display()) {
            debug!(path = %path.display(), type_id = %found.id(), "sample matched");
            detected.insert(found);
            if detected.len() == candidates.len() {
                break;
            }
        }
    }

    detected.pop_first()
}
