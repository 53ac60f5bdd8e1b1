//! Canonical release pipeline used when a request names no stages.

use crate::entities::{ServiceKind, StageSpec};

/// Service kinds of the standard pipeline, in execution order
pub const STANDARD_PIPELINE: [ServiceKind; 6] = [
    ServiceKind::Obs,
    ServiceKind::Upload,
    ServiceKind::Test,
    ServiceKind::Replicate,
    ServiceKind::Publish,
    ServiceKind::Deprecate,
];

/// Build the standard linear pipeline, each stage depending on the one
/// before it. With `last_service` the chain stops after that kind.
///
/// Stage ids are the service kind names.
pub fn standard_release_stages(last_service: Option<ServiceKind>) -> Vec<StageSpec> {
    let mut stages: Vec<StageSpec> = Vec::new();

    for kind in STANDARD_PIPELINE {
        let mut spec = StageSpec::new(kind.as_str(), kind);
        if let Some(previous) = stages.last() {
            spec = spec.depends_on(previous.id.clone());
        }
        stages.push(spec);

        if last_service == Some(kind) {
            break;
        }
    }

    stages
}
