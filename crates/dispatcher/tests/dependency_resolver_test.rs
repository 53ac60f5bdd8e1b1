#[cfg(test)]
mod tests {
    use chrono::Utc;
    use orchestrator_core::OrchestratorError;
    use orchestrator_dispatcher::dependency_resolver::{
        cascade_failure, recompute_eligibility, validate_graph,
    };
    use orchestrator_domain::{
        ImageDescriptor, Job, ServiceKind, StageSpec, StageState, REASON_UPSTREAM_FAILED,
    };

    fn job_with(stages: Vec<StageSpec>) -> Job {
        validate_graph(&stages).unwrap();
        Job::new(ImageDescriptor::new("image"), stages, 3, None)
    }

    fn diamond() -> Vec<StageSpec> {
        vec![
            StageSpec::new("a", ServiceKind::Obs),
            StageSpec::new("b", ServiceKind::Upload).depends_on("a"),
            StageSpec::new("c", ServiceKind::Test).depends_on("a"),
            StageSpec::new("d", ServiceKind::Publish)
                .depends_on("b")
                .depends_on("c"),
        ]
    }

    fn assert_invalid(stages: Vec<StageSpec>, fragment: &str) {
        match validate_graph(&stages) {
            Err(OrchestratorError::InvalidGraph(message)) => assert!(
                message.contains(fragment),
                "expected '{fragment}' in '{message}'"
            ),
            other => panic!("expected InvalidGraph, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_graphs_are_accepted() {
        assert!(validate_graph(&diamond()).is_ok());
        assert!(validate_graph(&[StageSpec::new("solo", ServiceKind::Upload)]).is_ok());
    }

    #[test]
    fn test_cycle_is_rejected_with_members() {
        let stages = vec![
            StageSpec::new("a", ServiceKind::Obs),
            StageSpec::new("b", ServiceKind::Upload)
                .depends_on("a")
                .depends_on("c"),
            StageSpec::new("c", ServiceKind::Test).depends_on("b"),
        ];
        assert_invalid(stages, "b, c");
    }

    #[test]
    fn test_two_node_cycle_without_roots_is_rejected() {
        let stages = vec![
            StageSpec::new("a", ServiceKind::Obs).depends_on("b"),
            StageSpec::new("b", ServiceKind::Upload).depends_on("a"),
        ];
        assert_invalid(stages, "cycle");
    }

    #[test]
    fn test_malformed_graphs_are_rejected() {
        assert_invalid(vec![], "no stages");
        assert_invalid(
            vec![StageSpec::new("a", ServiceKind::Obs).depends_on("a")],
            "depends on itself",
        );
        assert_invalid(
            vec![StageSpec::new("a", ServiceKind::Obs).depends_on("missing")],
            "unknown stage missing",
        );
        assert_invalid(
            vec![
                StageSpec::new("a", ServiceKind::Obs),
                StageSpec::new("a", ServiceKind::Upload),
            ],
            "duplicate stage id a",
        );
        assert_invalid(vec![StageSpec::new("  ", ServiceKind::Obs)], "must not be empty");
    }

    #[test]
    fn test_repeated_dependency_is_not_a_cycle() {
        let stages = vec![
            StageSpec::new("a", ServiceKind::Obs),
            StageSpec::new("b", ServiceKind::Upload)
                .depends_on("a")
                .depends_on("a"),
        ];
        assert!(validate_graph(&stages).is_ok());
    }

    #[test]
    fn test_roots_start_eligible_and_dependents_blocked() {
        let job = job_with(diamond());
        assert_eq!(job.stage("a").unwrap().state, StageState::Eligible);
        for id in ["b", "c", "d"] {
            assert_eq!(job.stage(id).unwrap().state, StageState::Blocked);
        }
    }

    #[test]
    fn test_eligibility_requires_every_dependency_completed() {
        let mut job = job_with(diamond());
        let now = Utc::now();

        for id in ["a", "b"] {
            let stage = job.stage_mut(id).unwrap();
            if stage.state == StageState::Blocked {
                stage.mark_eligible(now).unwrap();
            }
            stage.claim("dispatcher-1", now).unwrap();
            stage.complete(None, now).unwrap();
        }

        let promoted = recompute_eligibility(&mut job, now).unwrap();
        assert_eq!(promoted, vec!["c".to_string()]);
        assert_eq!(job.stage("d").unwrap().state, StageState::Blocked);

        let stage = job.stage_mut("c").unwrap();
        stage.claim("dispatcher-1", now).unwrap();
        stage.complete(None, now).unwrap();

        let promoted = recompute_eligibility(&mut job, now).unwrap();
        assert_eq!(promoted, vec!["d".to_string()]);
        assert!(recompute_eligibility(&mut job, now).unwrap().is_empty());
    }

    #[test]
    fn test_cascade_fails_transitive_dependents_once() {
        let stages = vec![
            StageSpec::new("a", ServiceKind::Obs),
            StageSpec::new("b", ServiceKind::Upload).depends_on("a"),
            StageSpec::new("c", ServiceKind::Test).depends_on("b"),
            StageSpec::new("d", ServiceKind::Publish)
                .depends_on("b")
                .depends_on("c"),
            StageSpec::new("other", ServiceKind::Deprecate),
        ];
        let mut job = job_with(stages);
        let now = Utc::now();

        let stage = job.stage_mut("a").unwrap();
        stage.claim("dispatcher-1", now).unwrap();
        stage.fail("build broke", now).unwrap();

        let mut cascaded = cascade_failure(&mut job, "a", now).unwrap();
        cascaded.sort();
        assert_eq!(cascaded, vec!["b", "c", "d"]);

        for id in ["b", "c", "d"] {
            let stage = job.stage(id).unwrap();
            assert_eq!(stage.state, StageState::Failed);
            assert_eq!(stage.failure_reason.as_deref(), Some(REASON_UPSTREAM_FAILED));
        }
        assert_eq!(job.stage("other").unwrap().state, StageState::Eligible);

        // A second cascade from the same stage finds nothing left to fail
        assert!(cascade_failure(&mut job, "a", now).unwrap().is_empty());
    }

    #[test]
    fn test_cascade_leaves_independent_branch_running() {
        let stages = vec![
            StageSpec::new("a", ServiceKind::Obs),
            StageSpec::new("b", ServiceKind::Upload).depends_on("a"),
            StageSpec::new("c", ServiceKind::Test).depends_on("a"),
            StageSpec::new("after_b", ServiceKind::Publish).depends_on("b"),
        ];
        let mut job = job_with(stages);
        let now = Utc::now();

        let a = job.stage_mut("a").unwrap();
        a.claim("dispatcher-1", now).unwrap();
        a.complete(None, now).unwrap();
        recompute_eligibility(&mut job, now).unwrap();

        for id in ["b", "c"] {
            job.stage_mut(id).unwrap().claim("dispatcher-1", now).unwrap();
        }
        job.stage_mut("b").unwrap().fail("upload rejected", now).unwrap();

        let cascaded = cascade_failure(&mut job, "b", now).unwrap();
        assert_eq!(cascaded, vec!["after_b".to_string()]);
        assert_eq!(job.stage("c").unwrap().state, StageState::Dispatched);
    }
}
