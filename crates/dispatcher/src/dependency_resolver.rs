//! Stage graph validation and eligibility resolution.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{Job, StageId, StageSpec, StageState, REASON_UPSTREAM_FAILED};
use tracing::debug;

/// Reject graphs that could never finish: no stages, duplicate ids,
/// self-dependencies, dependencies outside the job, or cycles.
pub fn validate_graph(stages: &[StageSpec]) -> OrchestratorResult<()> {
    if stages.is_empty() {
        return Err(OrchestratorError::invalid_graph("job has no stages"));
    }

    let mut ids = HashSet::new();
    for stage in stages {
        if stage.id.trim().is_empty() {
            return Err(OrchestratorError::invalid_graph("stage id must not be empty"));
        }
        if !ids.insert(stage.id.as_str()) {
            return Err(OrchestratorError::invalid_graph(format!(
                "duplicate stage id {}",
                stage.id
            )));
        }
    }

    for stage in stages {
        for dependency in &stage.dependencies {
            if dependency == &stage.id {
                return Err(OrchestratorError::invalid_graph(format!(
                    "stage {} depends on itself",
                    stage.id
                )));
            }
            if !ids.contains(dependency.as_str()) {
                return Err(OrchestratorError::invalid_graph(format!(
                    "stage {} depends on unknown stage {}",
                    stage.id, dependency
                )));
            }
        }
    }

    // Kahn's algorithm: anything left unvisited sits on a cycle
    let mut in_degree: HashMap<&str, usize> = stages
        .iter()
        .map(|s| {
            let unique: HashSet<&str> = s.dependencies.iter().map(String::as_str).collect();
            (s.id.as_str(), unique.len())
        })
        .collect();
    let dependents = dependents_of(stages.iter().map(|s| (s.id.as_str(), &s.dependencies)));

    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;

    while let Some(id) = ready.pop_front() {
        visited += 1;
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(*dependent);
                }
            }
        }
    }

    if visited != stages.len() {
        let mut cyclic: Vec<&str> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id)
            .collect();
        cyclic.sort_unstable();
        return Err(OrchestratorError::invalid_graph(format!(
            "dependency cycle among stages {}",
            cyclic.join(", ")
        )));
    }

    Ok(())
}

/// Move every BLOCKED stage whose dependencies are all COMPLETED to
/// ELIGIBLE. Returns the ids that changed.
pub fn recompute_eligibility(job: &mut Job, now: DateTime<Utc>) -> OrchestratorResult<Vec<StageId>> {
    let completed: HashSet<StageId> = job
        .stages_in(StageState::Completed)
        .map(|s| s.id.clone())
        .collect();

    let mut promoted = Vec::new();
    for stage in job.stages.iter_mut() {
        if stage.state == StageState::Blocked
            && stage.dependencies.iter().all(|dep| completed.contains(dep))
        {
            stage.mark_eligible(now)?;
            promoted.push(stage.id.clone());
        }
    }

    if !promoted.is_empty() {
        debug!(job_id = %job.id, stages = ?promoted, "stages became eligible");
    }

    Ok(promoted)
}

/// Fail every transitive dependent of `failed_stage` that is still
/// BLOCKED. Stages already FAILED are left as they are.
pub fn cascade_failure(
    job: &mut Job,
    failed_stage: &str,
    now: DateTime<Utc>,
) -> OrchestratorResult<Vec<StageId>> {
    let job_id = job.id.clone();
    let dependents = dependents_of(job.stages.iter().map(|s| (s.id.as_str(), &s.dependencies)))
        .into_iter()
        .map(|(id, deps)| {
            (
                id.to_string(),
                deps.into_iter().map(str::to_string).collect::<Vec<_>>(),
            )
        })
        .collect::<HashMap<String, Vec<String>>>();

    let mut queue = VecDeque::from([failed_stage.to_string()]);
    let mut visited: HashSet<String> = HashSet::from([failed_stage.to_string()]);
    let mut cascaded = Vec::new();

    while let Some(id) = queue.pop_front() {
        for dependent in dependents.get(&id).into_iter().flatten() {
            if !visited.insert(dependent.clone()) {
                continue;
            }

            let stage = job
                .stage_mut(dependent)
                .ok_or_else(|| OrchestratorError::stage_not_found(&job_id, dependent))?;
            if stage.state == StageState::Blocked {
                stage.fail(REASON_UPSTREAM_FAILED, now)?;
                cascaded.push(dependent.clone());
            }
            queue.push_back(dependent.clone());
        }
    }

    if !cascaded.is_empty() {
        debug!(%job_id, failed_stage, stages = ?cascaded, "cascaded stage failure");
    }

    Ok(cascaded)
}

fn dependents_of<'a, I>(stages: I) -> HashMap<&'a str, Vec<&'a str>>
where
    I: Iterator<Item = (&'a str, &'a Vec<StageId>)>,
{
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, dependencies) in stages {
        let unique: HashSet<&str> = dependencies.iter().map(String::as_str).collect();
        for dependency in unique {
            dependents.entry(dependency).or_default().push(id);
        }
    }
    dependents
}
